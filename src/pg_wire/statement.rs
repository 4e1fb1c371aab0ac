//! Prepared statements
//!
//! A statement holds the raw SQL, the parameter type OIDs from Parse, and —
//! after a Bind — the parameter values both as parsed text (used for the
//! textually substituted query) and as driver binds. The textual substitution
//! is lossy and serves classification and Describe probes only; real
//! execution goes through the driver's parameterised API.

use tracing::warn;

use super::protocol::messages::Bind;
use super::protocol::types::{
    BOOL_OID, BPCHAR_OID, FLOAT4_OID, FLOAT8_OID, INT2_OID, INT4_OID, INT8_OID, TEXT_OID,
    VARCHAR_OID,
};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedStatement {
    pub name: String,
    pub query: String,
    pub parameter_oids: Vec<u32>,
    parameters: Option<Vec<String>>,
    binds: Option<Vec<Option<String>>>,
}

impl PreparedStatement {
    pub fn new(name: String, query: String, parameter_oids: Vec<u32>) -> Self {
        Self {
            name,
            query,
            parameter_oids,
            parameters: None,
            binds: None,
        }
    }

    /// Driver bind values; NULL for every parameter when no Bind has
    /// arrived yet.
    pub fn binds(&self) -> Vec<Option<String>> {
        match &self.binds {
            Some(binds) => binds.clone(),
            None => vec![None; self.parameter_oids.len()],
        }
    }

    /// The textually substituted query. With a matching parameter count each
    /// `?` is replaced (in order) by the parameter text and each `$i` by
    /// `null`; with a mismatched count every placeholder becomes `null`.
    pub fn effective_query(&self) -> String {
        if self.parameter_oids.is_empty() {
            return self.query.clone();
        }

        match &self.parameters {
            Some(parameters) if parameters.len() == self.parameter_oids.len() => {
                let mut query = self.query.clone();
                for (i, parameter) in parameters.iter().enumerate() {
                    query = query.replacen('?', parameter, 1);
                    query = query.replacen(&format!("${}", i + 1), "null", 1);
                }
                query
            }
            _ => {
                warn!(statement = %self.name, "improper prepared statement parameters, substituting nulls");
                let mut query = self.query.clone();
                for i in 0..self.parameter_oids.len() {
                    query = query.replacen(&format!("${}", i + 1), "null", 1);
                }
                for _ in 0..self.parameter_oids.len() {
                    query = query.replacen('?', "null", 1);
                }
                query
            }
        }
    }

    /// Decode a Bind message's parameter values onto this statement.
    pub fn bind(&mut self, msg: &Bind) -> Result<()> {
        let mut binds = Vec::with_capacity(msg.parameters.len());
        let mut parameters = Vec::with_capacity(msg.parameters.len());
        for (i, parameter) in msg.parameters.iter().enumerate() {
            let format_code = msg.parameter_format_codes.get(i).copied().unwrap_or(0);
            let oid = self.parameter_oids.get(i).copied().unwrap_or(0);
            let raw = parameter.as_deref().unwrap_or_default();
            let parsed = parse_parameter(format_code, oid, raw)?;
            binds.push(Some(parsed.clone()));
            parameters.push(parsed);
        }
        self.parameters = Some(parameters);
        self.binds = Some(binds);
        Ok(())
    }
}

/// Decode one raw parameter under its format code and type OID.
fn parse_parameter(format_code: i16, parameter_oid: u32, param: &[u8]) -> Result<String> {
    match format_code {
        0 => return Ok(String::from_utf8_lossy(param).into_owned()),
        1 => match parameter_oid {
            BOOL_OID => {
                if let Some(&first) = param.first() {
                    return Ok(if first == 0 { "false" } else { "true" }.to_string());
                }
            }
            INT2_OID | INT4_OID | INT8_OID => match param.len() {
                2 => return Ok(u16::from_be_bytes([param[0], param[1]]).to_string()),
                4 => {
                    return Ok(
                        u32::from_be_bytes([param[0], param[1], param[2], param[3]]).to_string()
                    )
                }
                8 => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(param);
                    return Ok(i64::from_be_bytes(bytes).to_string());
                }
                _ => {}
            },
            FLOAT4_OID | FLOAT8_OID => match param.len() {
                4 => {
                    let bits = u32::from_be_bytes([param[0], param[1], param[2], param[3]]);
                    return Ok(f32::from_bits(bits).to_string());
                }
                8 => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(param);
                    return Ok(f64::from_bits(u64::from_be_bytes(bytes)).to_string());
                }
                _ => {}
            },
            BPCHAR_OID | VARCHAR_OID | TEXT_OID => {
                return Ok(String::from_utf8_lossy(param).into_owned())
            }
            other => {
                warn!(data_type_oid = other, "data type OID is not explicitly supported");
                return Ok(String::from_utf8_lossy(param).into_owned());
            }
        },
        _ => {}
    }

    Err(GatewayError::QueryParse(format!(
        "unsupported format code or data type OID: format_code={}, dataTypeOID={}",
        format_code, parameter_oid
    )))
}
