//! Per-session query executor
//!
//! Orchestrates both query protocols over one client socket: the simple path
//! (one Query message in, results plus ReadyForQuery out) and the extended
//! path (Parse/Bind/Describe/Execute/Sync/Close). Owns the session's prepared
//! statements, cursors, and advisory transaction flag.
//!
//! The extended path is a straight-line loop over received messages with
//! three terminal edges: Execute and Close exit without ReadyForQuery, Sync
//! emits it and flushes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::buffer::MessageBuffer;
use super::cursor::{Cursor, CursorFormat};
use super::protocol::messages::{
    BackendMessage, Bind, ErrorResponse, FrontendMessage, MessageReader,
};
use super::protocol::{MAX_BUFFERED_MESSAGES, TX_STATUS_IDLE, TX_STATUS_IN_TRANSACTION};
use super::row_encoder::{encode_row_text, row_description};
use super::statement::PreparedStatement;
use crate::backend::{BackendSession, DriverError, RowStream};
use crate::error::{GatewayError, Result};
use crate::query_rewrite::{limit_query, QueryRewriter};
use crate::query_router::{
    command_tag, is_begin_query, is_close_query, is_data_query, is_deallocate_query,
    is_declare_cursor_query, is_fetch_query, is_set_query, parse_close_query,
    parse_declare_cursor_query, parse_fetch_query, parse_set_query, query_discards_transaction,
    query_returns_empty_response, query_returns_no_rows,
};

pub struct QueryExecutor<R, W> {
    reader: MessageReader<R>,
    mb: MessageBuffer<W>,
    vdb: Box<dyn BackendSession>,
    pgdb: Box<dyn BackendSession>,
    rewriter: Arc<QueryRewriter>,
    synchronized_schemas: Vec<String>,
    prepared_statements: HashMap<String, PreparedStatement>,
    cursors: HashMap<String, Cursor>,
    in_transaction: bool,
    shutdown: CancellationToken,
}

/// Race a backend future against the server-wide shutdown token.
async fn with_cancel<T>(
    shutdown: &CancellationToken,
    fut: impl Future<Output = std::result::Result<T, DriverError>>,
) -> std::result::Result<T, DriverError> {
    tokio::select! {
        _ = shutdown.cancelled() => Err(DriverError::other("query canceled")),
        result = fut => result,
    }
}

/// Map a session error onto the wire. Driver errors keep their reported
/// fields; everything else degrades to a generic `0A000`.
fn error_response(err: &GatewayError) -> ErrorResponse {
    match err {
        GatewayError::Driver(driver_err) => ErrorResponse::from_driver(driver_err),
        other => ErrorResponse::new("ERROR", "0A000", other.to_string()),
    }
}

impl<R, W> QueryExecutor<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: R,
        writer: W,
        vdb: Box<dyn BackendSession>,
        pgdb: Box<dyn BackendSession>,
        rewriter: Arc<QueryRewriter>,
        synchronized_schemas: Vec<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reader: MessageReader::new(reader),
            mb: MessageBuffer::new(writer),
            vdb,
            pgdb,
            rewriter,
            synchronized_schemas,
            prepared_statements: HashMap::new(),
            cursors: HashMap::new(),
            in_transaction: false,
            shutdown,
        }
    }

    fn transaction_status(&self) -> u8 {
        if self.in_transaction {
            TX_STATUS_IN_TRANSACTION
        } else {
            TX_STATUS_IDLE
        }
    }

    fn ready(&self) -> BackendMessage {
        BackendMessage::ReadyForQuery {
            tx_status: self.transaction_status(),
        }
    }

    fn queue_complete_ready(&mut self, tag: &str) {
        let ready = self.ready();
        self.mb.queue([
            BackendMessage::CommandComplete { tag: tag.into() },
            ready,
        ]);
    }

    fn queue_error_ready(&mut self, err: &GatewayError) {
        let ready = self.ready();
        self.mb
            .queue([BackendMessage::Error(error_response(err)), ready]);
    }

    /// Serve the session until Terminate, socket close, or a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let msg = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(GatewayError::Cancelled),
                msg = self.reader.receive() => msg?,
            };
            debug!(message = ?msg, "[recv]");

            match msg {
                FrontendMessage::Query { sql } => {
                    if let Err(e) = self.handle_query(&sql).await {
                        error!(error = %e, "query message");
                    }
                }
                FrontendMessage::Parse {
                    name,
                    sql,
                    parameter_oids,
                } => {
                    if let Err(e) = self.handle_parse(name, sql, parameter_oids).await {
                        error!(error = %e, "parse message");
                    }
                }
                FrontendMessage::Bind(bind) => {
                    if let Err(e) = self.handle_bind_message(bind).await {
                        error!(error = %e, "bind message");
                    }
                }
                FrontendMessage::Describe { target, name } => {
                    if let Err(e) = self.handle_describe(target, &name, None).await {
                        error!(error = %e, "describe message");
                    }
                }
                FrontendMessage::Close { .. } => {
                    self.mb.queue([BackendMessage::CloseComplete]);
                }
                FrontendMessage::Sync => {
                    let ready = self.ready();
                    self.mb.queue([ready]);
                    self.mb.flush().await?;
                }
                FrontendMessage::Terminate => return Ok(()),
                other => {
                    warn!(message = ?other, "unexpected message type");
                }
            }
        }
    }

    /// Release cursors and backend handles, keeping the first error.
    pub async fn close_resources(&mut self) -> Result<()> {
        let mut first_error: Option<GatewayError> = None;

        let names: Vec<String> = self.cursors.keys().cloned().collect();
        for name in names {
            if let Some(mut cursor) = self.cursors.remove(&name) {
                if let Err(e) = cursor.close().await {
                    first_error.get_or_insert(e);
                }
            }
        }
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

    // ===== Simple query path =====

    async fn handle_query(&mut self, query: &str) -> Result<()> {
        info!(query, "received query");
        let tag = command_tag(query);

        if is_deallocate_query(query) {
            self.queue_complete_ready(&tag);
            return self.mb.flush().await;
        }

        if is_close_query(query) {
            self.close_cursor(query).await;
            self.queue_complete_ready(&tag);
            return self.mb.flush().await;
        }

        if is_declare_cursor_query(query) {
            self.declare_cursor(query).await;
            return self.mb.flush().await;
        }

        if is_fetch_query(query) {
            self.fetch_from_cursor(query).await;
            return self.mb.flush().await;
        }

        let mut rows = match self.execute_query(query).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(query, error = %e, "query error");
                let err: GatewayError = e.into();
                self.queue_error_ready(&err);
                self.mb.flush().await?;
                return Err(err);
            }
        };

        if is_begin_query(query) {
            self.in_transaction = true;
        }
        if query_discards_transaction(query) {
            self.in_transaction = false;
        }

        if query_returns_no_rows(query) {
            let _ = rows.close().await;
            self.queue_complete_ready(&tag);
            return self.mb.flush().await;
        }

        if query_returns_empty_response(query) {
            let _ = rows.close().await;
            let ready = self.ready();
            self.mb.queue([
                BackendMessage::EmptyQueryResponse,
                BackendMessage::CommandComplete { tag: tag.clone() },
                ready,
            ]);
            return self.mb.flush().await;
        }

        let columns = rows.columns().to_vec();
        self.mb.queue([row_description(&columns)]);

        let streamed = self.write_rows_in_chunks(rows.as_mut()).await;
        let _ = rows.close().await;
        streamed?;

        self.queue_complete_ready(&tag);
        self.mb.flush().await
    }

    /// Route a simple query to its backend, rewriting DATA queries for
    /// Vertica.
    async fn execute_query(
        &mut self,
        query: &str,
    ) -> std::result::Result<Box<dyn RowStream>, DriverError> {
        let shutdown = self.shutdown.clone();
        if is_data_query(query, &self.synchronized_schemas) {
            info!(query, "route query to vertica");
            let rewritten = self.rewriter.rewrite(query);
            if rewritten != query {
                info!(query = %rewritten, "rewritten query");
            }
            with_cancel(&shutdown, self.vdb.query(&rewritten, &[])).await
        } else {
            info!(query, "route query to postgres");
            with_cancel(&shutdown, self.pgdb.query(query, &[])).await
        }
    }

    // ===== Cursors =====

    async fn declare_cursor(&mut self, declare_query: &str) {
        let tag = command_tag(declare_query);

        let parsed = match parse_declare_cursor_query(declare_query) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.queue_error_ready(&e);
                return;
            }
        };
        let format = match CursorFormat::parse(&parsed.cursor_type) {
            Ok(format) => format,
            Err(e) => {
                self.queue_error_ready(&e);
                return;
            }
        };

        let query = self.rewriter.rewrite(&parsed.query);
        let mut cursor = Cursor::new(parsed.name, query.clone(), format);

        let shutdown = self.shutdown.clone();
        let opened = tokio::select! {
            _ = shutdown.cancelled() => Err(GatewayError::Cancelled),
            result = cursor.open(self.vdb.as_mut()) => result,
        };
        if let Err(e) = opened {
            self.queue_error_ready(&e);
            return;
        }

        info!(cursor = %cursor.name, query, "declare and open cursor");
        self.cursors.insert(cursor.name.clone(), cursor);
        self.queue_complete_ready(&tag);
    }

    async fn fetch_from_cursor(&mut self, fetch_query: &str) {
        let tag = command_tag(fetch_query);

        let parsed = match parse_fetch_query(fetch_query) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.queue_error_ready(&e);
                return;
            }
        };

        let shutdown = self.shutdown.clone();
        let fetched = match self.cursors.get_mut(&parsed.cursor_name) {
            None => Err(GatewayError::UnknownCursor(parsed.cursor_name.clone())),
            Some(cursor) => tokio::select! {
                _ = shutdown.cancelled() => Err(GatewayError::Cancelled),
                result = cursor.fetch(parsed.count) => result,
            },
        };

        match fetched {
            Ok(messages) => {
                self.mb.queue(messages);
                self.queue_complete_ready(&tag);
            }
            Err(e) => self.queue_error_ready(&e),
        }
    }

    async fn close_cursor(&mut self, close_query: &str) {
        let name = match parse_close_query(close_query) {
            Ok(name) => name,
            Err(e) => {
                error!(error = %e, "close cursor error");
                return;
            }
        };
        match self.cursors.remove(&name) {
            None => error!(cursor = %name, "cursor does not exist"),
            Some(mut cursor) => {
                if let Err(e) = cursor.close().await {
                    error!(cursor = %name, error = %e, "close cursor error");
                }
            }
        }
    }

    // ===== Extended query path =====

    async fn handle_parse(
        &mut self,
        name: String,
        sql: String,
        parameter_oids: Vec<u32>,
    ) -> Result<()> {
        let statement = PreparedStatement::new(name, sql, parameter_oids);
        // cache named prepared statements
        if !statement.name.is_empty() {
            self.prepared_statements
                .insert(statement.name.clone(), statement.clone());
        }
        self.mb.queue([BackendMessage::ParseComplete]);
        self.extended_query_loop(statement).await
    }

    /// A Bind that did not follow a Parse in-sequence: resolve the named
    /// statement and re-enter the extended loop as if Parse had produced it.
    async fn handle_bind_message(&mut self, bind: Bind) -> Result<()> {
        let Some(statement) = self.prepared_statements.get(&bind.statement) else {
            self.mb.queue([BackendMessage::Error(ErrorResponse::new(
                "ERROR",
                "26000",
                format!("prepared statement \"{}\" does not exist", bind.statement),
            ))]);
            return Err(GatewayError::UnknownPreparedStatement(bind.statement));
        };

        let mut statement = statement.clone();
        if let Err(e) = statement.bind(&bind) {
            self.mb.queue([BackendMessage::Error(ErrorResponse::new(
                "ERROR",
                "22023",
                "invalid parameter value",
            ))]);
            return Err(e);
        }

        self.prepared_statements
            .insert(bind.statement.clone(), statement.clone());
        self.mb.queue([BackendMessage::BindComplete]);
        self.extended_query_loop(statement).await
    }

    /// Loop over extended-protocol messages until a terminal edge.
    async fn extended_query_loop(&mut self, mut statement: PreparedStatement) -> Result<()> {
        loop {
            let msg = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(GatewayError::Cancelled),
                msg = self.reader.receive() => msg.map_err(|e| {
                    GatewayError::Protocol(format!("receive message during parse: {}", e))
                })?,
            };
            debug!(message = ?msg, "[recv][extended]");

            match msg {
                FrontendMessage::Bind(bind) => {
                    if let Err(e) = self.bind_current(&mut statement, &bind) {
                        error!(error = %e, "error handling bind");
                    }
                }
                FrontendMessage::Describe { target, name } => {
                    if let Err(e) = self.handle_describe(target, &name, Some(&statement)).await {
                        error!(error = %e, "error handling describe");
                    }
                }
                FrontendMessage::Execute { .. } => {
                    return self.handle_execute(&statement).await;
                }
                FrontendMessage::Sync => {
                    let ready = self.ready();
                    self.mb.queue([ready]);
                    return self.mb.flush().await;
                }
                FrontendMessage::Close { .. } => {
                    self.mb.queue([BackendMessage::CloseComplete]);
                    return Ok(());
                }
                other => {
                    return Err(GatewayError::Protocol(format!(
                        "unexpected message type during parse: {:?}",
                        other
                    )));
                }
            }
        }
    }

    fn bind_current(&mut self, statement: &mut PreparedStatement, bind: &Bind) -> Result<()> {
        statement.bind(bind)?;
        if !statement.name.is_empty() {
            self.prepared_statements
                .insert(statement.name.clone(), statement.clone());
        }
        self.mb.queue([BackendMessage::BindComplete]);
        Ok(())
    }

    /// Describe a statement ('S') or portal ('P'), probing the backend with a
    /// LIMIT 1 run when the statement returns rows.
    async fn handle_describe(
        &mut self,
        target: u8,
        name: &str,
        current: Option<&PreparedStatement>,
    ) -> Result<()> {
        let looked_up;
        let statement = match current {
            Some(statement) => statement,
            None => match self.prepared_statements.get(name) {
                Some(statement) => {
                    looked_up = statement.clone();
                    &looked_up
                }
                None => {
                    return Err(GatewayError::UnknownPreparedStatement(name.to_string()));
                }
            },
        };

        let query = statement.effective_query();
        if query_returns_no_rows(&query)
            || query_returns_empty_response(&query)
            || is_declare_cursor_query(&query)
        {
            match target {
                b'S' => {
                    self.mb.queue([
                        BackendMessage::ParameterDescription {
                            parameter_oids: Vec::new(),
                        },
                        BackendMessage::NoData,
                    ]);
                    return Ok(());
                }
                b'P' => {
                    self.mb.queue([BackendMessage::NoData]);
                    return Ok(());
                }
                other => {
                    return Err(GatewayError::Protocol(format!(
                        "unexpected object type: {}",
                        other as char
                    )));
                }
            }
        }

        let mut rows = match self.execute_prepared(statement, true).await {
            Ok(rows) => rows,
            Err(e) => {
                self.mb
                    .queue([BackendMessage::Error(ErrorResponse::from_driver(&e))]);
                self.mb.flush().await?;
                return Err(e.into());
            }
        };
        let columns = rows.columns().to_vec();
        let _ = rows.close().await;

        match target {
            b'S' => {
                self.mb.queue([
                    BackendMessage::ParameterDescription {
                        parameter_oids: statement.parameter_oids.clone(),
                    },
                    row_description(&columns),
                ]);
            }
            b'P' => {
                self.mb.queue([row_description(&columns)]);
            }
            other => {
                return Err(GatewayError::Protocol(format!(
                    "unexpected object type: {}",
                    other as char
                )));
            }
        }
        Ok(())
    }

    /// Execute the current statement. No ReadyForQuery here: that belongs to
    /// the Sync that follows.
    async fn handle_execute(&mut self, statement: &PreparedStatement) -> Result<()> {
        let query = statement.effective_query();
        let tag = command_tag(&query);

        if is_deallocate_query(&query) {
            self.queue_complete_ready(&tag);
            return Ok(());
        }

        if is_close_query(&query) {
            self.close_cursor(&query).await;
            self.queue_complete_ready(&tag);
            return Ok(());
        }

        if is_declare_cursor_query(&query) {
            self.declare_cursor(&query).await;
            return Ok(());
        }

        if is_fetch_query(&query) {
            self.fetch_from_cursor(&query).await;
            return Ok(());
        }

        if is_set_query(&query) {
            // handled locally, not forwarded to either backend
            match parse_set_query(&query) {
                Err(e) => {
                    error!(query, error = %e, "error parsing set query");
                    self.mb
                        .queue([BackendMessage::CommandComplete { tag: tag.clone() }]);
                }
                Ok((name, value)) => {
                    self.mb.queue([
                        BackendMessage::CommandComplete { tag: tag.clone() },
                        BackendMessage::ParameterStatus { name, value },
                    ]);
                }
            }
            return Ok(());
        }

        let mut rows = match self.execute_prepared(statement, false).await {
            Ok(rows) => rows,
            Err(e) => {
                self.mb
                    .queue([BackendMessage::Error(ErrorResponse::from_driver(&e))]);
                self.mb.flush().await?;
                return Err(e.into());
            }
        };

        if is_begin_query(&query) {
            self.in_transaction = true;
        }
        if query_discards_transaction(&query) {
            self.in_transaction = false;
        }

        if query_returns_no_rows(&query) {
            let _ = rows.close().await;
            self.mb
                .queue([BackendMessage::CommandComplete { tag: tag.clone() }]);
            return Ok(());
        }

        if query_returns_empty_response(&query) {
            let _ = rows.close().await;
            self.mb.queue([
                BackendMessage::EmptyQueryResponse,
                BackendMessage::CommandComplete { tag: tag.clone() },
            ]);
            return Ok(());
        }

        let streamed = self.write_rows_in_chunks(rows.as_mut()).await;
        let _ = rows.close().await;
        streamed?;

        self.mb
            .queue([BackendMessage::CommandComplete { tag }]);
        Ok(())
    }

    /// Route a prepared statement to its backend. The Describe probe gets a
    /// transparently appended LIMIT 1 on the Vertica path.
    async fn execute_prepared(
        &mut self,
        statement: &PreparedStatement,
        describe: bool,
    ) -> std::result::Result<Box<dyn RowStream>, DriverError> {
        let effective = statement.effective_query();
        let binds = statement.binds();
        let shutdown = self.shutdown.clone();

        if is_data_query(&effective, &self.synchronized_schemas) {
            let mut query = statement.query.clone();
            if describe {
                query = limit_query(&query, 1);
            }
            info!(query = %query, "route query to vertica");
            let rewritten = self.rewriter.rewrite(&query);
            if rewritten != query {
                info!(query = %rewritten, "rewritten query");
            }
            with_cancel(&shutdown, self.vdb.query(&rewritten, &binds)).await
        } else {
            info!(query = %statement.query, "route query to postgres");
            with_cancel(&shutdown, self.pgdb.query(&statement.query, &binds)).await
        }
    }

    // ===== Row streaming =====

    /// Drain the row stream into DataRow messages, flushing the buffer every
    /// time it reaches the bounded batch size.
    async fn write_rows_in_chunks(&mut self, rows: &mut dyn RowStream) -> Result<()> {
        self.mb.flush().await?;

        let columns = rows.columns().to_vec();
        let shutdown = self.shutdown.clone();
        loop {
            let Some(values) = with_cancel(&shutdown, rows.next_row()).await? else {
                break;
            };
            let row = encode_row_text(&values, &columns)?;
            self.mb.queue([row]);
            if self.mb.len() >= MAX_BUFFERED_MESSAGES {
                self.mb.flush().await?;
            }
        }

        if !self.mb.is_empty() {
            self.mb.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockHandle, MockSession};
    use crate::backend::{Column, PostgresErrorFields, Value};
    use crate::pg_wire::testutil;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Harness {
        vdb: MockSession,
        pgdb: MockSession,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                vdb: MockSession::new(),
                pgdb: MockSession::new(),
            }
        }

        fn vdb_handle(&self) -> MockHandle {
            self.vdb.handle()
        }

        fn pgdb_handle(&self) -> MockHandle {
            self.pgdb.handle()
        }

        /// Feed a client script through a fresh executor and collect the raw
        /// response bytes.
        async fn run(self, script: Vec<u8>) -> Vec<u8> {
            let (mut client, server) = tokio::io::duplex(1 << 20);
            let (read_half, write_half) = tokio::io::split(server);
            let mut executor = QueryExecutor::new(
                read_half,
                write_half,
                Box::new(self.vdb),
                Box::new(self.pgdb),
                Arc::new(QueryRewriter::new("database")),
                vec!["my_schema".to_string()],
                CancellationToken::new(),
            );

            client.write_all(&script).await.unwrap();
            executor.run().await.unwrap();
            executor.close_resources().await.unwrap();
            drop(executor);

            let mut bytes = Vec::new();
            client.read_to_end(&mut bytes).await.unwrap();
            bytes
        }
    }

    fn user_rows() -> (Vec<Column>, Vec<Vec<Value>>) {
        (
            vec![Column::new("id", "INT8"), Column::new("name", "VARCHAR")],
            vec![vec![Value::Int(1), Value::Text("Test".into())]],
        )
    }

    #[tokio::test]
    async fn simple_select_streams_rows_in_order() {
        let harness = Harness::new();
        let pgdb = harness.pgdb_handle();
        let (cols, rows) = user_rows();
        pgdb.push_rows(cols, rows);

        let mut script = testutil::query_frame("SELECT * FROM test");
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let frames = testutil::parse_backend_frames(&bytes);
        let types: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'T', b'D', b'C', b'Z']);
        assert_eq!(frames[2].1, b"SELECT 1\0");
        assert_eq!(frames[3].1, vec![b'I']);
        assert_eq!(pgdb.executed(), vec!["SELECT * FROM test"]);
    }

    #[tokio::test]
    async fn data_query_routes_to_vertica_rewritten() {
        let harness = Harness::new();
        let vdb = harness.vdb_handle();
        let pgdb = harness.pgdb_handle();
        let (cols, rows) = user_rows();
        vdb.push_rows(cols, rows);

        let mut script = testutil::query_frame("SELECT id::integer FROM my_schema.users");
        script.extend(testutil::terminate_frame());
        harness.run(script).await;

        assert_eq!(vdb.executed(), vec!["SELECT id::int FROM my_schema.users"]);
        assert!(pgdb.executed().is_empty());
    }

    #[tokio::test]
    async fn begin_and_commit_toggle_transaction_status() {
        let harness = Harness::new();

        let mut script = testutil::query_frame("BEGIN");
        script.extend(testutil::query_frame("COMMIT"));
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let frames = testutil::parse_backend_frames(&bytes);
        let types: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'C', b'Z', b'C', b'Z']);
        assert_eq!(frames[1].1, vec![b'T']);
        assert_eq!(frames[3].1, vec![b'I']);
    }

    #[tokio::test]
    async fn backend_error_maps_to_error_response_then_ready() {
        let harness = Harness::new();
        harness.pgdb_handle().push_error(DriverError::Postgres(PostgresErrorFields {
            severity: "ERROR".into(),
            code: "42P01".into(),
            message: "relation \"missing\" does not exist".into(),
            ..Default::default()
        }));

        let mut script = testutil::query_frame("SELECT * FROM missing");
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let frames = testutil::parse_backend_frames(&bytes);
        let types: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'E', b'Z']);
        let body = String::from_utf8_lossy(&frames[0].1);
        assert!(body.contains("C42P01"));
        assert!(body.contains("relation \"missing\" does not exist"));
    }

    #[tokio::test]
    async fn set_query_on_simple_path_forwards_and_completes() {
        let harness = Harness::new();
        let pgdb = harness.pgdb_handle();

        let mut script = testutil::query_frame("SET search_path TO public");
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let frames = testutil::parse_backend_frames(&bytes);
        let types: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'C', b'Z']);
        assert_eq!(pgdb.executed(), vec!["SET search_path TO public"]);
    }

    #[tokio::test]
    async fn deallocate_is_not_forwarded() {
        let harness = Harness::new();
        let pgdb = harness.pgdb_handle();
        let vdb = harness.vdb_handle();

        let mut script = testutil::query_frame("DEALLOCATE stmt1");
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(types, vec![b'C', b'Z']);
        assert!(pgdb.executed().is_empty());
        assert!(vdb.executed().is_empty());
    }

    #[tokio::test]
    async fn empty_query_gets_empty_query_response() {
        let harness = Harness::new();

        let mut script = testutil::query_frame("");
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(types, vec![b'I', b'C', b'Z']);
    }

    #[tokio::test]
    async fn extended_parse_describe_execute_sync() {
        let harness = Harness::new();
        let pgdb = harness.pgdb_handle();
        let (cols, rows) = user_rows();
        pgdb.push_rows(cols.clone(), rows.clone()); // describe probe
        pgdb.push_rows(cols, rows); // execute

        let mut script = testutil::parse_frame("", "SELECT * FROM test", &[]);
        script.extend(testutil::describe_frame(b'S', ""));
        script.extend(testutil::execute_frame("", 0));
        script.extend(testutil::sync_frame());
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(types, vec![b'1', b't', b'T', b'D', b'C', b'Z']);
    }

    #[tokio::test]
    async fn describe_of_no_rows_statement_sends_no_data() {
        let harness = Harness::new();

        let mut script = testutil::parse_frame("", "BEGIN", &[]);
        script.extend(testutil::describe_frame(b'S', ""));
        script.extend(testutil::sync_frame());
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(types, vec![b'1', b't', b'n', b'Z']);
    }

    #[tokio::test]
    async fn named_statement_survives_for_standalone_bind() {
        let harness = Harness::new();
        let pgdb = harness.pgdb_handle();
        let (cols, rows) = user_rows();
        pgdb.push_rows(cols, rows);

        let mut script = testutil::parse_frame("s1", "SELECT * FROM test WHERE a = ?", &[25]);
        script.extend(testutil::sync_frame());
        script.extend(testutil::bind_frame("", "s1", &[0], &[Some(b"p1".as_slice())]));
        script.extend(testutil::execute_frame("", 0));
        script.extend(testutil::sync_frame());
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(types, vec![b'1', b'Z', b'2', b'D', b'C', b'Z']);
        assert_eq!(pgdb.executed(), vec!["SELECT * FROM test WHERE a = ?"]);
    }

    #[tokio::test]
    async fn bind_of_unknown_statement_gets_26000() {
        let harness = Harness::new();

        let mut script = testutil::bind_frame("", "does_not_exist", &[], &[]);
        script.extend(testutil::sync_frame());
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let frames = testutil::parse_backend_frames(&bytes);
        let types: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'E', b'Z']);
        let body = String::from_utf8_lossy(&frames[0].1);
        assert!(body.contains("C26000"));
        assert!(body.contains("prepared statement \"does_not_exist\" does not exist"));
    }

    #[tokio::test]
    async fn set_under_extended_execute_emits_parameter_status() {
        let harness = Harness::new();
        let pgdb = harness.pgdb_handle();
        let vdb = harness.vdb_handle();

        let mut script = testutil::parse_frame("", "SET application_name = 'tool'", &[]);
        script.extend(testutil::execute_frame("", 0));
        script.extend(testutil::sync_frame());
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let frames = testutil::parse_backend_frames(&bytes);
        let types: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'1', b'C', b'S', b'Z']);
        assert_eq!(frames[2].1, b"application_name\0tool\0");
        assert!(pgdb.executed().is_empty());
        assert!(vdb.executed().is_empty());
    }

    #[tokio::test]
    async fn close_during_extended_sequence_exits_without_ready() {
        let harness = Harness::new();

        let mut script = testutil::parse_frame("s1", "SELECT 1", &[]);
        script.extend(testutil::close_frame(b'S', "s1"));
        script.extend(testutil::sync_frame());
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(types, vec![b'1', b'3', b'Z']);
    }

    #[tokio::test]
    async fn declare_fetch_close_cursor_flow() {
        let harness = Harness::new();
        let vdb = harness.vdb_handle();
        vdb.push_rows(
            vec![Column::new("col1", "VARCHAR")],
            vec![vec![Value::Text("val1".into())], vec![Value::Text("val2".into())]],
        );

        let mut script = testutil::query_frame(
            "DECLARE cur1 TEXT CURSOR WITH HOLD FOR SELECT * FROM my_schema.users",
        );
        script.extend(testutil::query_frame("FETCH FORWARD 1 FROM cur1"));
        script.extend(testutil::query_frame("CLOSE cur1"));
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(
            types,
            vec![b'C', b'Z', b'T', b'D', b'C', b'Z', b'C', b'Z']
        );
        assert_eq!(vdb.executed(), vec!["SELECT * FROM my_schema.users"]);
    }

    #[tokio::test]
    async fn fetch_from_unknown_cursor_is_an_error() {
        let harness = Harness::new();

        let mut script = testutil::query_frame("FETCH FORWARD 1 FROM nope");
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let frames = testutil::parse_backend_frames(&bytes);
        let types: Vec<u8> = frames.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![b'E', b'Z']);
        assert!(String::from_utf8_lossy(&frames[0].1).contains("does not exist"));
    }

    #[tokio::test]
    async fn terminate_releases_backend_handles() {
        let harness = Harness::new();
        let vdb = harness.vdb_handle();
        let pgdb = harness.pgdb_handle();

        harness.run(testutil::terminate_frame()).await;

        assert!(vdb.is_closed());
        assert!(pgdb.is_closed());
    }

    #[tokio::test]
    async fn row_streaming_flushes_in_bounded_batches() {
        let harness = Harness::new();
        let pgdb = harness.pgdb_handle();
        let rows: Vec<Vec<Value>> = (0..40).map(|i| vec![Value::Int(i)]).collect();
        pgdb.push_rows(vec![Column::new("n", "INT8")], rows);

        let mut script = testutil::query_frame("SELECT * FROM numbers");
        script.extend(testutil::terminate_frame());
        let bytes = harness.run(script).await;

        let types = testutil::backend_message_types(&bytes);
        assert_eq!(types[0], b'T');
        assert_eq!(types.iter().filter(|&&t| t == b'D').count(), 40);
        assert_eq!(types[types.len() - 2], b'C');
        assert_eq!(types[types.len() - 1], b'Z');
    }
}
