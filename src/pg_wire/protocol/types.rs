//! PostgreSQL type OIDs
//!
//! Maps driver-reported database type names to the OIDs declared in
//! RowDescription. Integer types deliberately widen to the 8-byte OID on the
//! wire.

pub const BOOL_OID: u32 = 16;
pub const BYTEA_OID: u32 = 17;
pub const INT8_OID: u32 = 20;
pub const INT2_OID: u32 = 21;
pub const INT4_OID: u32 = 23;
pub const TEXT_OID: u32 = 25;
pub const FLOAT4_OID: u32 = 700;
pub const FLOAT8_OID: u32 = 701;
pub const BPCHAR_OID: u32 = 1042;
pub const VARCHAR_OID: u32 = 1043;
pub const DATE_OID: u32 = 1082;
pub const TIME_OID: u32 = 1083;
pub const TIMESTAMP_OID: u32 = 1114;

/// Get the wire OID for a driver-reported database type name.
pub fn wire_type_oid(database_type: &str) -> u32 {
    match database_type {
        "BOOL" => BOOL_OID,
        "INT4" | "INT8" | "BIGINT" | "INT32" | "INT2" | "INT" => INT8_OID,
        "OID" | "XID" | "INT2VECTOR" | "OIDVECTOR" | "_OID" | "_INT2" | "NAME" | "_ACLITEM"
        | "_TEXT" | "REGPROC" | "PG_NODE_TREE" => TEXT_OID,
        "FLOAT4" | "FLOAT8" | "DECIMAL" | "NUMERIC" | "FLOAT" => FLOAT8_OID,
        "TIMESTAMP" => TIMESTAMP_OID,
        "DATE" => DATE_OID,
        "TIME" => TIME_OID,
        "VARCHAR" | "TEXT" | "CHAR" => TEXT_OID,
        "BYTEA" => BYTEA_OID,
        _ => TEXT_OID,
    }
}
