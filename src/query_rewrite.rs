//! SQL dialect rewriting
//!
//! Bridges the two dialects in both directions: PostgreSQL-flavored DML is
//! rewritten before it reaches Vertica, and Vertica-exported CREATE TABLE
//! DDL is translated before it is replayed onto PostgreSQL.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::query_router::normalize_query;

/// PostgreSQL type name → Vertica type name, applied to `::type` and
/// `CAST(... AS type)` forms in queries routed to Vertica.
static POSTGRES_TO_VERTICA_TYPES: &[(&str, &str)] = &[
    ("boolean", "boolean"),
    ("smallint", "int"),
    ("integer", "int"),
    ("bigint", "int"),
    ("real", "float"),
    ("numeric", "numeric"),
    ("decimal", "numeric"),
    ("date", "date"),
    ("timestamp", "timestamp"),
    ("timestamptz", "timestamptz"),
    ("time", "time"),
    ("interval", "interval"),
    ("varchar", "varchar"),
    ("text", "varchar"),
    ("bytea", "varbinary"),
    ("json", "long varchar"),
    ("jsonb", "long varchar"),
    ("uuid", "varchar(50)"),
    ("inet", "varchar(39)"),
    ("cidr", "varchar(43)"),
];

/// Vertica type name → PostgreSQL type name, applied to imported DDL.
static VERTICA_TO_POSTGRES_TYPES: &[(&str, &str)] = &[
    ("boolean", "boolean"),
    ("int", "bigint"),
    ("float", "double precision"),
    ("numeric", "numeric"),
    ("date", "date"),
    ("timestamp", "timestamp"),
    ("timestamptz", "timestamptz"),
    ("time", "time"),
    ("timetz", "timetz"),
    ("interval", "interval"),
];

static TYPE_CAST_COLON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)::([a-zA-Z0-9]+)").unwrap());
static TYPE_CAST_AS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)AS (([a-zA-Z0-9]+))\)").unwrap());
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"LIMIT (0|[1-9][0-9]*)").unwrap());
static TEXT_PAREN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"text\(\d*?\)").unwrap());
static PARTITION_BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"PARTITION BY \(.*\)").unwrap());

/// Word-bounded replacement patterns for the DDL type map, so that a second
/// translation pass is a no-op.
static VERTICA_TYPE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    VERTICA_TO_POSTGRES_TYPES
        .iter()
        .map(|(vertica, postgres)| {
            (Regex::new(&format!(r"\b{}\b", vertica)).unwrap(), *postgres)
        })
        .collect()
});

fn map_postgres_to_vertica_type(data_type: &str) -> Option<&'static str> {
    let data_type = data_type.to_lowercase();
    POSTGRES_TO_VERTICA_TYPES
        .iter()
        .find(|(pg, _)| *pg == data_type)
        .map(|(_, vertica)| *vertica)
}

/// Replace PostgreSQL type names in `::type` and `CAST(expr AS type)` forms
/// with their Vertica counterparts. Unknown types are left untouched.
pub fn replace_postgres_data_types(query: &str) -> String {
    let replaced = TYPE_CAST_COLON_RE.replace_all(query, |caps: &regex::Captures| {
        match map_postgres_to_vertica_type(caps[1].trim()) {
            Some(vertica_type) => format!("::{}", vertica_type),
            None => caps[0].to_string(),
        }
    });

    TYPE_CAST_AS_RE
        .replace_all(&replaced, |caps: &regex::Captures| {
            match map_postgres_to_vertica_type(caps[1].trim()) {
                Some(vertica_type) => format!("AS {})", vertica_type),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Append ` LIMIT <n>` unless the normalized query already carries a LIMIT.
pub fn limit_query(query: &str, limit: i64) -> String {
    if LIMIT_RE.is_match(&normalize_query(query)) {
        query.to_string()
    } else {
        let trimmed = query.trim().trim_matches(';');
        format!("{} LIMIT {}", trimmed, limit)
    }
}

/// Per-server query rewriter for statements routed to Vertica. Holds the one
/// configuration-dependent pattern (stripping the PostgreSQL database
/// qualification), compiled once and shared across sessions.
#[derive(Debug)]
pub struct QueryRewriter {
    from_db_re: Regex,
}

impl QueryRewriter {
    pub fn new(pgdb_name: &str) -> Self {
        let from_db_re = Regex::new(&format!(
            r#"(?i)FROM\s+(["']?{}["']?\.)"#,
            regex::escape(pgdb_name)
        ))
        .expect("escaped database name forms a valid pattern");
        Self { from_db_re }
    }

    /// Rewrite a DATA query for Vertica: map the cast types and strip the
    /// leading `<pgdb>.` from schema-qualified table references.
    pub fn rewrite(&self, query: &str) -> String {
        let query = replace_postgres_data_types(query);
        self.from_db_re.replace_all(&query, "FROM ").into_owned()
    }
}

/// Translate one Vertica-exported CREATE TABLE statement into PostgreSQL
/// DDL. Applied by the schema synchronizer to each exported block.
pub fn translate_create_table(statement: &str) -> String {
    let mut statement = statement.replacen("CREATE TABLE", "CREATE TABLE IF NOT EXISTS", 15);
    for (pattern, postgres_type) in VERTICA_TYPE_PATTERNS.iter() {
        statement = pattern.replace_all(&statement, *postgres_type).into_owned();
    }
    let statement = TEXT_PAREN_RE.replace_all(&statement, "text");
    PARTITION_BY_RE.replace_all(&statement, "").into_owned()
}
