//! Query classification
//!
//! Decides which backend a statement belongs to and detects the statement
//! kinds the executor intercepts (BEGIN/COMMIT/SET/FETCH/CLOSE/DECLARE/
//! DEALLOCATE). All predicates are pure functions of the statement text and
//! the configured synchronized-schema list.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GatewayError, Result};

/// PostgreSQL catalog and information-schema identifiers. A query mentioning
/// any of these is never routed to Vertica.
static POSTGRES_TECHNICAL_TABLES: &[&str] = &[
    "PG_AGGREGATE",
    "PG_AM",
    "PG_AMOP",
    "PG_AMPROC",
    "PG_ATTRDEF",
    "PG_ATTRIBUTE",
    "PG_AUTH_MEMBERS",
    "PG_AUTHID",
    "PG_CAST",
    "PG_CLASS",
    "PG_COLLATION",
    "PG_CONSTRAINT",
    "PG_CONVERSION",
    "PG_DATABASE",
    "PG_ENUM",
    "PG_FOREIGN_DATA_WRAPPER",
    "PG_FOREIGN_SERVER",
    "PG_FOREIGN_TABLE",
    "PG_INDEX",
    "PG_INHERITS",
    "PG_LANGUAGE",
    "PG_LARGEOBJECT",
    "PG_LARGEOBJECT_METADATA",
    "PG_NAMESPACE",
    "PG_OPCLASS",
    "PG_OPERATOR",
    "PG_OPFAMILY",
    "PG_PLTEMPLATE",
    "PG_PROC",
    "PG_REWRITE",
    "PG_SHDEPEND",
    "PG_SHDESCRIPTION",
    "PG_STATISTIC",
    "PG_TABLESPACE",
    "PG_TRIGGER",
    "PG_TS_CONFIG",
    "PG_TS_CONFIG_MAP",
    "PG_TS_DICT",
    "PG_TS_PARSER",
    "PG_TS_TEMPLATE",
    "PG_TYPE",
    "PG_USER_MAPPING",
    "PG_DIST_NODE",
    "INFORMATION_SCHEMA",
];

static DECLARE_CURSOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)DECLARE\s+(\w+)\s+(.*) CURSOR .*? FOR\s+(.*)").unwrap());
static FETCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)FETCH\s+(?P<Direction>\w+)?\s*(?P<Count>\d+)?\s*(FROM|IN)?\s*(?P<CursorName>\w+)?")
        .unwrap()
});
static CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)CLOSE\s+(.*)").unwrap());

/// A parsed `DECLARE <name> <type> CURSOR ... FOR <query>` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclareCursorQuery {
    pub name: String,
    pub cursor_type: String,
    pub query: String,
}

/// A parsed `FETCH [direction] [count] [FROM|IN] <cursor>` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub direction: String,
    pub count: i64,
    pub cursor_name: String,
}

/// Uppercase and trim a statement, dropping the lines whose trimmed form is a
/// prefix of `--`.
pub fn normalize_query(query: &str) -> String {
    let normalized = query.trim().to_uppercase();
    let lines: Vec<&str> = normalized
        .lines()
        .filter(|line| !"--".starts_with(line.trim()))
        .collect();
    lines.join("\n")
}

pub fn is_deallocate_query(query: &str) -> bool {
    normalize_query(query).starts_with("DEALLOCATE")
}

pub fn is_begin_query(query: &str) -> bool {
    normalize_query(query).starts_with("BEGIN")
}

pub fn is_set_query(query: &str) -> bool {
    normalize_query(query).starts_with("SET")
}

/// COMMIT, ROLLBACK and DISCARD all leave any advisory transaction.
pub fn query_discards_transaction(query: &str) -> bool {
    let normalized = normalize_query(query);
    normalized.starts_with("COMMIT")
        || normalized.starts_with("ROLLBACK")
        || normalized.starts_with("DISCARD")
}

/// Statements answered with a bare CommandComplete, no row data.
pub fn query_returns_no_rows(query: &str) -> bool {
    let normalized = normalize_query(query);
    ["BEGIN", "SET", "COMMIT", "ROLLBACK", "DISCARD"]
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
}

/// Statements answered with an EmptyQueryResponse.
pub fn query_returns_empty_response(query: &str) -> bool {
    normalize_query(query).starts_with("BEGIN") || query.is_empty()
}

pub fn is_close_query(query: &str) -> bool {
    CLOSE_RE.is_match(query)
}

pub fn parse_close_query(query: &str) -> Result<String> {
    let caps = CLOSE_RE
        .captures(query)
        .ok_or_else(|| GatewayError::QueryParse(format!("unable to parse close query: {}", query)))?;
    Ok(caps[1].to_string())
}

pub fn is_declare_cursor_query(query: &str) -> bool {
    DECLARE_CURSOR_RE.is_match(query)
}

pub fn parse_declare_cursor_query(query: &str) -> Result<DeclareCursorQuery> {
    let caps = DECLARE_CURSOR_RE
        .captures(query)
        .ok_or_else(|| GatewayError::QueryParse("can't parse declare cursor query".into()))?;
    Ok(DeclareCursorQuery {
        name: caps[1].to_string(),
        cursor_type: caps[2].to_string(),
        query: caps[3].to_string(),
    })
}

pub fn is_fetch_query(query: &str) -> bool {
    FETCH_RE.is_match(query)
}

pub fn parse_fetch_query(query: &str) -> Result<FetchQuery> {
    let caps = FETCH_RE
        .captures(query)
        .ok_or_else(|| GatewayError::QueryParse(format!("unable to parse fetch query: {}", query)))?;

    let count = match caps.name("Count") {
        Some(m) => m
            .as_str()
            .parse::<i64>()
            .map_err(|e| GatewayError::QueryParse(e.to_string()))?,
        None => 0,
    };

    Ok(FetchQuery {
        direction: caps
            .name("Direction")
            .map(|m| m.as_str().to_uppercase())
            .unwrap_or_default(),
        count,
        cursor_name: caps
            .name("CursorName")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
    })
}

/// Parse `SET <param> (TO|=) <value>` into its name and value. The value is
/// stripped of surrounding whitespace and quote characters.
pub fn parse_set_query(expression: &str) -> Result<(String, String)> {
    let expression = expression.trim();

    let expression = expression
        .strip_prefix("SET ")
        .ok_or_else(|| GatewayError::QueryParse("expression must start with 'SET '".into()))?;

    let mut parts: Option<(&str, &str)> = None;
    for separator in ["TO", "="] {
        let split: Vec<&str> = expression.split(separator).collect();
        if split.len() == 2 {
            parts = Some((split[0], split[1]));
            break;
        }
    }

    let (name, value) = parts
        .ok_or_else(|| GatewayError::QueryParse("can't parse expression, must contain 'TO' or '='".into()))?;

    Ok((
        name.trim().to_string(),
        value.trim_matches(|c| c == ' ' || c == '\'' || c == '"').to_string(),
    ))
}

/// A DATA query is a SELECT over a synchronized schema with no technical
/// table reference; it is routed to Vertica.
pub fn is_data_query(query: &str, synchronized_schemas: &[String]) -> bool {
    let normalized = query.trim().to_uppercase();
    for table in POSTGRES_TECHNICAL_TABLES {
        if normalized.contains(table) {
            return false;
        }
    }
    if !normalized.starts_with("SELECT") {
        return false;
    }
    let mentions_schema = synchronized_schemas
        .iter()
        .any(|schema| normalized.contains(&schema.to_uppercase()));
    mentions_schema && normalized.contains("FROM")
}

/// Derive the CommandComplete tag from the statement's first token. Row
/// counts are synthetic.
pub fn command_tag(query: &str) -> String {
    let query = query.trim().to_lowercase();
    let command = query.split(' ').next().unwrap_or("");

    match command {
        "insert" => "INSERT 0 1".to_string(),
        "delete" => "DELETE 1".to_string(),
        "update" => "UPDATE 1".to_string(),
        "select" => "SELECT 1".to_string(),
        other => other.to_uppercase(),
    }
}
