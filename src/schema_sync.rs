//! Schema synchronization
//!
//! One-shot job that mirrors Vertica schemas into PostgreSQL so catalog
//! introspection by BI tools resolves there: recreates each non-system
//! schema, replays its exported CREATE TABLE DDL (translated to PostgreSQL),
//! drops tables that no longer exist in Vertica, and mirrors roles with
//! blanket grants. Writes only to PostgreSQL; never touches listener or
//! session state.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info};

use crate::backend::{connect, BackendOpener, BackendSession, Value};
use crate::error::{GatewayError, Result};
use crate::query_rewrite::translate_create_table;

static CREATE_TABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^CREATE\s+TABLE").unwrap());

pub struct SchemaSynchronizer {
    vdb: Box<dyn BackendSession>,
    pgdb: Box<dyn BackendSession>,
}

impl SchemaSynchronizer {
    /// Open both backend handles.
    pub async fn connect(
        opener: &dyn BackendOpener,
        vertica_url: &str,
        postgres_url: &str,
    ) -> Result<Self> {
        let vdb = connect(opener, "vertica", vertica_url, None).await.map_err(|e| {
            error!("can't connect to Vertica");
            e
        })?;
        info!("established connection to Vertica");

        let pgdb = connect(opener, "postgres", postgres_url, None).await.map_err(|e| {
            error!("can't connect to Postgres");
            e
        })?;
        info!("established connection to Postgres");

        Ok(Self::new(vdb, pgdb))
    }

    pub fn new(vdb: Box<dyn BackendSession>, pgdb: Box<dyn BackendSession>) -> Self {
        Self { vdb, pgdb }
    }

    /// Release both handles, keeping the first error.
    pub async fn close(&mut self) -> Result<()> {
        let mut first_error: Option<GatewayError> = None;
        if let Err(e) = self.vdb.close().await {
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.pgdb.close().await {
            first_error.get_or_insert(e.into());
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Mirror every synchronizable Vertica schema into PostgreSQL.
    pub async fn sync_schemas(&mut self) -> Result<()> {
        let schemas = self.list_schemas().await?;
        if schemas.is_empty() {
            info!("no schemas to sync");
            return Ok(());
        }

        info!(?schemas, "sync schemas");
        for schema in &schemas {
            self.recreate_schema(schema).await?;
            self.delete_missing_tables(schema).await?;
        }

        if let Err(e) = self.sync_roles(&schemas).await {
            error!(error = %e, "error syncing roles");
        }
        info!("schemas synced");
        Ok(())
    }

    /// Vertica schema names, minus system schemas and `public`.
    pub async fn list_schemas(&mut self) -> Result<Vec<String>> {
        let names = list_ids(
            self.vdb.as_mut(),
            "SELECT schema_name FROM v_catalog.schemata",
        )
        .await?;
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with("v_") && name != "public")
            .collect())
    }

    async fn recreate_schema(&mut self, schema: &str) -> Result<()> {
        self.pgdb
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .await?;

        let exported = self.export_schema(schema).await?;
        for create_table in create_table_statements(&exported) {
            let translated = translate_create_table(&create_table);
            debug!(query = %translated, "run translated query on postgres");
            if let Err(e) = self.pgdb.execute(&translated).await {
                error!(query = %translated, error = %e, "error on query");
            }
        }
        Ok(())
    }

    async fn export_schema(&mut self, schema: &str) -> Result<String> {
        let sql = format!("SELECT export_objects('', '{}')", schema);
        let mut rows = self.vdb.query(&sql, &[]).await?;
        let row = rows.next_row().await?;
        let _ = rows.close().await;

        row.and_then(|values| values.first().and_then(value_to_string))
            .ok_or_else(|| {
                GatewayError::QueryParse(format!("failed to export schema '{}'", schema))
            })
    }

    /// Drop PostgreSQL tables that no longer exist in Vertica for `schema`.
    async fn delete_missing_tables(&mut self, schema: &str) -> Result<()> {
        let vertica_tables = list_ids(
            self.vdb.as_mut(),
            &format!(
                "SELECT table_name FROM v_catalog.tables WHERE table_schema='{}';",
                schema
            ),
        )
        .await?;

        let postgres_tables = list_ids(
            self.pgdb.as_mut(),
            &format!(
                "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = '{}';",
                schema
            ),
        )
        .await?;

        for table in postgres_tables {
            if !vertica_tables.contains(&table) {
                debug!(table = %table, "drop table");
                self.pgdb
                    .execute(&format!("DROP TABLE IF EXISTS {}.{};", schema, table))
                    .await?;
            }
        }
        Ok(())
    }

    async fn sync_roles(&mut self, schemas: &[String]) -> Result<()> {
        debug!("sync roles");
        let roles = self.list_roles().await?;

        for role in &roles {
            if self.role_exists(role).await? {
                debug!(role = %role, "role already exists");
            } else {
                self.pgdb.execute(&format!("CREATE ROLE {}", role)).await?;
                debug!(role = %role, "role created");
            }
        }

        for schema in schemas {
            for role in &roles {
                self.grant_schema(schema, role).await?;
                self.grant_tables(schema, role).await?;
            }
        }
        Ok(())
    }

    /// Vertica roles and users, both mirrored as PostgreSQL roles.
    async fn list_roles(&mut self) -> Result<Vec<String>> {
        let mut roles = list_ids(self.vdb.as_mut(), "SELECT name from v_catalog.roles;").await?;
        let users = list_ids(self.vdb.as_mut(), "SELECT user_name from v_catalog.users;").await?;
        roles.extend(users);
        Ok(roles)
    }

    async fn role_exists(&mut self, role: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM pg_roles WHERE rolname='{}'", role);
        let mut rows = self.pgdb.query(&sql, &[]).await?;
        let row = rows.next_row().await?;
        let _ = rows.close().await;
        Ok(row.is_some())
    }

    async fn grant_schema(&mut self, schema: &str, role: &str) -> Result<()> {
        let sql = format!("GRANT ALL ON SCHEMA {} TO {};", schema, role);
        self.pgdb.execute(&sql).await.map_err(|e| {
            error!(query = %sql, error = %e, "error on query");
            GatewayError::from(e)
        })
    }

    async fn grant_tables(&mut self, schema: &str, role: &str) -> Result<()> {
        let tables = list_ids(
            self.pgdb.as_mut(),
            &format!(
                "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = '{}';",
                schema
            ),
        )
        .await?;

        for table in tables {
            let sql = format!("GRANT ALL ON TABLE {}.{} TO {};", schema, table, role);
            self.pgdb.execute(&sql).await.map_err(|e| {
                error!(query = %sql, error = %e, "error on query");
                GatewayError::from(e)
            })?;
        }
        Ok(())
    }
}

/// Split an `export_objects` dump on blank lines and keep the CREATE TABLE
/// blocks.
fn create_table_statements(exported: &str) -> Vec<String> {
    exported
        .split("\n\n")
        .filter(|block| CREATE_TABLE_RE.is_match(block.trim()))
        .map(|block| block.to_string())
        .collect()
}

/// Collect the first column of every row as a string.
async fn list_ids(db: &mut dyn BackendSession, sql: &str) -> Result<Vec<String>> {
    let mut rows = db.query(sql, &[]).await?;
    let mut ids = Vec::new();
    while let Some(values) = rows.next_row().await? {
        if let Some(id) = values.first().and_then(value_to_string) {
            ids.push(id);
        }
    }
    let _ = rows.close().await;
    Ok(ids)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        Value::Int(i) => Some(i.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
