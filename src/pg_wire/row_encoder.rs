//! Row encoding
//!
//! Scans driver row values into the wire representation for each column
//! type. Text format is the default; binary format exists for BINARY
//! cursors. NULL encodes as the protocol's nil marker in either format.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::warn;

use super::protocol::messages::{BackendMessage, FieldDescription};
use super::protocol::types::wire_type_oid;
use crate::backend::{Column, Value};
use crate::error::{GatewayError, Result};

/// Build the RowDescription for a driver-reported column set.
pub fn row_description(columns: &[Column]) -> BackendMessage {
    let fields = columns
        .iter()
        .map(|col| FieldDescription {
            name: col.name.clone(),
            table_oid: 0,
            column_attr: 0,
            data_type_oid: wire_type_oid(&col.type_name),
            data_type_size: -1,
            type_modifier: -1,
            format: 0,
        })
        .collect();
    BackendMessage::RowDescription { fields }
}

/// Encode one row in text format.
pub fn encode_row_text(values: &[Value], columns: &[Column]) -> Result<BackendMessage> {
    let mut out = Vec::with_capacity(values.len());
    for (value, col) in values.iter().zip(columns) {
        if let Value::Null = value {
            out.push(None);
            continue;
        }
        let data_type = col.type_name.as_str();
        let bytes: Vec<u8> = match data_type {
            "BOOL" => bool_value(value, data_type)?.to_string().into_bytes(),
            "INT4" | "INT8" | "INT32" | "INT2" | "INT" => {
                int_value(value, data_type)?.to_string().into_bytes()
            }
            "OID" | "XID" | "INT2VECTOR" | "OIDVECTOR" | "_OID" | "_INT2" | "NAME"
            | "_ACLITEM" | "_TEXT" | "REGPROC" | "PG_NODE_TREE" => raw_bytes(value, data_type)?,
            "FLOAT4" | "FLOAT8" | "FLOAT" | "NUMERIC" => {
                format_float(float_value(value, data_type)?).into_bytes()
            }
            "TIMESTAMP" | "TIMESTAMPTZ" => {
                format_timestamp(timestamp_value(value, data_type)?).into_bytes()
            }
            "DATE" => format_date(date_value(value, data_type)?).into_bytes(),
            "TIME" => format_time(time_value(value, data_type)?).into_bytes(),
            "VARCHAR" | "TEXT" | "CHAR" => text_value(value, data_type)?.into_bytes(),
            "BYTEA" => raw_bytes(value, data_type)?,
            _ => {
                warn!(data_type, "data type is not explicitly supported");
                match value {
                    Value::Bytes(b) => b.clone(),
                    Value::Text(s) => s.clone().into_bytes(),
                    _ => {
                        return Err(GatewayError::Encode(format!(
                            "unsupported data type: {}",
                            data_type
                        )))
                    }
                }
            }
        };
        out.push(Some(bytes));
    }
    Ok(BackendMessage::DataRow { values: out })
}

/// Encode one row in binary format.
pub fn encode_row_binary(values: &[Value], columns: &[Column]) -> Result<BackendMessage> {
    let mut out = Vec::with_capacity(values.len());
    for (value, col) in values.iter().zip(columns) {
        if let Value::Null = value {
            out.push(None);
            continue;
        }
        let data_type = col.type_name.as_str();
        let bytes: Vec<u8> = match data_type {
            "BOOL" => {
                if bool_value(value, data_type)? {
                    vec![1]
                } else {
                    vec![0]
                }
            }
            "INT4" | "INT32" => (int_value(value, data_type)? as i32).to_be_bytes().to_vec(),
            "INT8" | "INT" => int_value(value, data_type)?.to_be_bytes().to_vec(),
            "FLOAT4" => (float_value(value, data_type)? as f32).to_be_bytes().to_vec(),
            "FLOAT8" | "FLOAT" | "NUMERIC" => {
                float_value(value, data_type)?.to_be_bytes().to_vec()
            }
            "TIMESTAMP" | "TIMESTAMPTZ" => {
                // PostgreSQL's timestamp epoch is 2000-01-01
                let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)
                    .expect("valid epoch date")
                    .and_hms_opt(0, 0, 0)
                    .expect("valid epoch time");
                let delta = timestamp_value(value, data_type)?.signed_duration_since(epoch);
                let seconds = delta.num_microseconds().map(|us| us as f64 / 1e6).unwrap_or_else(|| delta.num_seconds() as f64);
                seconds.to_be_bytes().to_vec()
            }
            "BYTEA" | "VARCHAR" | "TEXT" | "CHAR" => raw_bytes(value, data_type)?,
            _ => {
                return Err(GatewayError::Encode(format!(
                    "unsupported data type for binary format: {}",
                    data_type
                )))
            }
        };
        out.push(Some(bytes));
    }
    Ok(BackendMessage::DataRow { values: out })
}

fn mismatch(data_type: &str, value: &Value) -> GatewayError {
    GatewayError::Encode(format!(
        "unexpected value for data type {}: {:?}",
        data_type, value
    ))
}

fn bool_value(value: &Value, data_type: &str) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(mismatch(data_type, other)),
    }
}

fn int_value(value: &Value, data_type: &str) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(mismatch(data_type, other)),
    }
}

fn float_value(value: &Value, data_type: &str) -> Result<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        other => Err(mismatch(data_type, other)),
    }
}

fn text_value(value: &Value, data_type: &str) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        other => Err(mismatch(data_type, other)),
    }
}

fn raw_bytes(value: &Value, data_type: &str) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::Text(s) => Ok(s.clone().into_bytes()),
        other => Err(mismatch(data_type, other)),
    }
}

fn timestamp_value<'a>(value: &'a Value, data_type: &str) -> Result<&'a NaiveDateTime> {
    match value {
        Value::Timestamp(t) => Ok(t),
        other => Err(mismatch(data_type, other)),
    }
}

fn date_value<'a>(value: &'a Value, data_type: &str) -> Result<&'a NaiveDate> {
    match value {
        Value::Date(d) => Ok(d),
        other => Err(mismatch(data_type, other)),
    }
}

fn time_value<'a>(value: &'a Value, data_type: &str) -> Result<&'a NaiveTime> {
    match value {
        Value::Time(t) => Ok(t),
        other => Err(mismatch(data_type, other)),
    }
}

/// Shortest round-trip decimal, never scientific notation.
fn format_float(f: f64) -> String {
    format!("{}", f)
}

/// Microsecond fraction with trailing zeros trimmed; empty when zero.
fn fraction(nanos: u32) -> String {
    let micros = nanos / 1_000;
    if micros == 0 {
        return String::new();
    }
    let digits = format!("{:06}", micros);
    format!(".{}", digits.trim_end_matches('0'))
}

fn format_timestamp(t: &NaiveDateTime) -> String {
    format!("{}{}", t.format("%Y-%m-%d %H:%M:%S"), fraction(t.nanosecond()))
}

fn format_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn format_time(t: &NaiveTime) -> String {
    format!("{}{}", t.format("%H:%M:%S"), fraction(t.nanosecond()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg_wire::protocol::types::{FLOAT8_OID, INT8_OID, TEXT_OID};

    fn columns(specs: &[(&str, &str)]) -> Vec<Column> {
        specs.iter().map(|(n, t)| Column::new(*n, *t)).collect()
    }

    fn data_row(msg: BackendMessage) -> Vec<Option<Vec<u8>>> {
        match msg {
            BackendMessage::DataRow { values } => values,
            other => panic!("expected DataRow, got {:?}", other),
        }
    }

    #[test]
    fn row_description_widens_and_defaults() {
        let desc = row_description(&columns(&[
            ("id", "INT4"),
            ("price", "NUMERIC"),
            ("name", "VARCHAR"),
            ("blob", "GEOMETRY"),
        ]));
        match desc {
            BackendMessage::RowDescription { fields } => {
                assert_eq!(fields[0].data_type_oid, INT8_OID);
                assert_eq!(fields[1].data_type_oid, FLOAT8_OID);
                assert_eq!(fields[2].data_type_oid, TEXT_OID);
                assert_eq!(fields[3].data_type_oid, TEXT_OID);
                assert!(fields.iter().all(|f| f.data_type_size == -1 && f.format == 0));
            }
            other => panic!("expected RowDescription, got {:?}", other),
        }
    }

    #[test]
    fn text_encodes_scalars() {
        let cols = columns(&[("a", "BOOL"), ("b", "INT8"), ("c", "FLOAT8"), ("d", "VARCHAR")]);
        let row = data_row(
            encode_row_text(
                &[
                    Value::Bool(true),
                    Value::Int(-7),
                    Value::Float(2.5),
                    Value::Text("x".into()),
                ],
                &cols,
            )
            .unwrap(),
        );
        assert_eq!(row[0].as_deref(), Some(b"true".as_slice()));
        assert_eq!(row[1].as_deref(), Some(b"-7".as_slice()));
        assert_eq!(row[2].as_deref(), Some(b"2.5".as_slice()));
        assert_eq!(row[3].as_deref(), Some(b"x".as_slice()));
    }

    #[test]
    fn text_floats_never_use_exponent_and_drop_zero_fraction() {
        let cols = columns(&[("a", "NUMERIC"), ("b", "FLOAT4")]);
        let row = data_row(
            encode_row_text(&[Value::Float(2.0), Value::Float(1e6)], &cols).unwrap(),
        );
        assert_eq!(row[0].as_deref(), Some(b"2".as_slice()));
        assert_eq!(row[1].as_deref(), Some(b"1000000".as_slice()));
    }

    #[test]
    fn text_encodes_null_as_nil_marker() {
        let cols = columns(&[("a", "INT8")]);
        let row = data_row(encode_row_text(&[Value::Null], &cols).unwrap());
        assert_eq!(row[0], None);
    }

    #[test]
    fn text_timestamp_trims_trailing_zeros() {
        let cols = columns(&[("t", "TIMESTAMP")]);
        let base = NaiveDate::from_ymd_opt(2023, 4, 5).unwrap();

        let t = base.and_hms_micro_opt(6, 7, 8, 123_400).unwrap();
        let row = data_row(encode_row_text(&[Value::Timestamp(t)], &cols).unwrap());
        assert_eq!(row[0].as_deref(), Some(b"2023-04-05 06:07:08.1234".as_slice()));

        let t = base.and_hms_opt(6, 7, 8).unwrap();
        let row = data_row(encode_row_text(&[Value::Timestamp(t)], &cols).unwrap());
        assert_eq!(row[0].as_deref(), Some(b"2023-04-05 06:07:08".as_slice()));
    }

    #[test]
    fn text_date_and_time_formats() {
        let cols = columns(&[("d", "DATE"), ("t", "TIME")]);
        let row = data_row(
            encode_row_text(
                &[
                    Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()),
                    Value::Time(NaiveTime::from_hms_micro_opt(23, 59, 59, 500_000).unwrap()),
                ],
                &cols,
            )
            .unwrap(),
        );
        assert_eq!(row[0].as_deref(), Some(b"1999-12-31".as_slice()));
        assert_eq!(row[1].as_deref(), Some(b"23:59:59.5".as_slice()));
    }

    #[test]
    fn text_unknown_type_passes_through_strings_and_bytes_only() {
        let cols = columns(&[("g", "GEOMETRY")]);
        let row =
            data_row(encode_row_text(&[Value::Text("POINT(0 0)".into())], &cols).unwrap());
        assert_eq!(row[0].as_deref(), Some(b"POINT(0 0)".as_slice()));

        let err = encode_row_text(&[Value::Int(1)], &cols).unwrap_err();
        assert!(err.to_string().contains("unsupported data type: GEOMETRY"));
    }

    #[test]
    fn binary_encodes_scalars_big_endian() {
        let cols = columns(&[("a", "BOOL"), ("b", "INT4"), ("c", "INT8"), ("d", "FLOAT8")]);
        let row = data_row(
            encode_row_binary(
                &[
                    Value::Bool(false),
                    Value::Int(5),
                    Value::Int(5),
                    Value::Float(1.5),
                ],
                &cols,
            )
            .unwrap(),
        );
        assert_eq!(row[0].as_deref(), Some([0u8].as_slice()));
        assert_eq!(row[1].as_deref(), Some(5i32.to_be_bytes().as_slice()));
        assert_eq!(row[2].as_deref(), Some(5i64.to_be_bytes().as_slice()));
        assert_eq!(row[3].as_deref(), Some(1.5f64.to_be_bytes().as_slice()));
    }

    #[test]
    fn binary_timestamp_is_seconds_since_pg_epoch() {
        let cols = columns(&[("t", "TIMESTAMPTZ")]);
        let t = NaiveDate::from_ymd_opt(2000, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let row = data_row(encode_row_binary(&[Value::Timestamp(t)], &cols).unwrap());
        assert_eq!(row[0].as_deref(), Some(86_400f64.to_be_bytes().as_slice()));
    }

    #[test]
    fn binary_rejects_unsupported_types() {
        let cols = columns(&[("d", "DATE")]);
        let err = encode_row_binary(
            &[Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())],
            &cols,
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("unsupported data type for binary format: DATE"));
    }
}
