//! PostgreSQL v3 message codec
//!
//! Frontend messages are decoded from the client socket; backend messages are
//! built as length-prefixed byte frames. Only the message family this gateway
//! speaks is implemented.

use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::backend::DriverError;
use crate::error::{GatewayError, Result};

pub const PROTOCOL_VERSION: u32 = 196_608; // 3.0
pub const SSL_REQUEST_CODE: u32 = 80_877_103;
pub const CANCEL_REQUEST_CODE: u32 = 80_877_102;

/// Upper bound on any frame body; a client exceeding it is misbehaving.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// The first message of a connection, framed without a type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRequest {
    Startup { parameters: HashMap<String, String> },
    SslRequest,
    CancelRequest,
}

/// A typed frontend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    Query {
        sql: String,
    },
    Parse {
        name: String,
        sql: String,
        parameter_oids: Vec<u32>,
    },
    Bind(Bind),
    Describe {
        target: u8,
        name: String,
    },
    Execute {
        portal: String,
        max_rows: i32,
    },
    Sync,
    Close {
        target: u8,
        name: String,
    },
    Password {
        password: String,
    },
    Terminate,
}

/// Body of a Bind message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bind {
    pub portal: String,
    pub statement: String,
    pub parameter_format_codes: Vec<i16>,
    pub parameters: Vec<Option<Vec<u8>>>,
    pub result_format_codes: Vec<i16>,
}

/// A typed backend message.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    ParameterStatus { name: String, value: String },
    ReadyForQuery { tx_status: u8 },
    CommandComplete { tag: String },
    EmptyQueryResponse,
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Vec<u8>>> },
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription { parameter_oids: Vec<u32> },
    Error(ErrorResponse),
}

/// One column of a RowDescription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub data_type_oid: u32,
    pub data_type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

/// An ErrorResponse. Only non-empty fields are written to the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorResponse {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: String,
    pub hint: String,
    pub internal_query: String,
    pub where_clause: String,
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type_name: String,
    pub constraint_name: String,
    pub file: String,
    pub routine: String,
}

impl ErrorResponse {
    pub fn new(severity: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: severity.into(),
            code: code.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Error carrying only a message, as startup failures are reported.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Map a backend driver error onto the wire. Recognized driver kinds keep
    /// their full field set; anything else becomes a generic `0A000`.
    pub fn from_driver(err: &DriverError) -> Self {
        match err {
            DriverError::Postgres(f) => Self {
                severity: f.severity.clone(),
                code: f.code.clone(),
                message: f.message.clone(),
                detail: f.detail.clone(),
                hint: f.hint.clone(),
                internal_query: f.internal_query.clone(),
                where_clause: f.where_clause.clone(),
                schema_name: f.schema_name.clone(),
                table_name: f.table_name.clone(),
                column_name: f.column_name.clone(),
                data_type_name: f.data_type_name.clone(),
                constraint_name: f.constraint_name.clone(),
                file: f.file.clone(),
                routine: f.routine.clone(),
            },
            DriverError::Vertica(f) => Self {
                severity: f.severity.clone(),
                code: f.code.clone(),
                message: f.message.clone(),
                detail: f.detail.clone(),
                hint: f.hint.clone(),
                ..Default::default()
            },
            DriverError::Other(e) => Self::new("ERROR", "0A000", e.to_string()),
        }
    }
}

impl BackendMessage {
    /// Append this message's wire frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            BackendMessage::AuthenticationOk => {
                buf.extend_from_slice(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
            }
            BackendMessage::AuthenticationCleartextPassword => {
                buf.extend_from_slice(&[b'R', 0, 0, 0, 8, 0, 0, 0, 3]);
            }
            BackendMessage::ParameterStatus { name, value } => {
                frame(buf, b'S', |body| {
                    put_cstr(body, name);
                    put_cstr(body, value);
                });
            }
            BackendMessage::ReadyForQuery { tx_status } => {
                buf.extend_from_slice(&[b'Z', 0, 0, 0, 5, *tx_status]);
            }
            BackendMessage::CommandComplete { tag } => {
                frame(buf, b'C', |body| put_cstr(body, tag));
            }
            BackendMessage::EmptyQueryResponse => {
                buf.extend_from_slice(&[b'I', 0, 0, 0, 4]);
            }
            BackendMessage::RowDescription { fields } => {
                frame(buf, b'T', |body| {
                    body.extend_from_slice(&(fields.len() as i16).to_be_bytes());
                    for field in fields {
                        put_cstr(body, &field.name);
                        body.extend_from_slice(&field.table_oid.to_be_bytes());
                        body.extend_from_slice(&field.column_attr.to_be_bytes());
                        body.extend_from_slice(&field.data_type_oid.to_be_bytes());
                        body.extend_from_slice(&field.data_type_size.to_be_bytes());
                        body.extend_from_slice(&field.type_modifier.to_be_bytes());
                        body.extend_from_slice(&field.format.to_be_bytes());
                    }
                });
            }
            BackendMessage::DataRow { values } => {
                frame(buf, b'D', |body| {
                    body.extend_from_slice(&(values.len() as i16).to_be_bytes());
                    for value in values {
                        match value {
                            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
                            Some(bytes) => {
                                body.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                                body.extend_from_slice(bytes);
                            }
                        }
                    }
                });
            }
            BackendMessage::ParseComplete => buf.extend_from_slice(&[b'1', 0, 0, 0, 4]),
            BackendMessage::BindComplete => buf.extend_from_slice(&[b'2', 0, 0, 0, 4]),
            BackendMessage::CloseComplete => buf.extend_from_slice(&[b'3', 0, 0, 0, 4]),
            BackendMessage::NoData => buf.extend_from_slice(&[b'n', 0, 0, 0, 4]),
            BackendMessage::ParameterDescription { parameter_oids } => {
                frame(buf, b't', |body| {
                    body.extend_from_slice(&(parameter_oids.len() as i16).to_be_bytes());
                    for oid in parameter_oids {
                        body.extend_from_slice(&oid.to_be_bytes());
                    }
                });
            }
            BackendMessage::Error(err) => {
                frame(buf, b'E', |body| {
                    let fields: [(u8, &str); 14] = [
                        (b'S', &err.severity),
                        (b'C', &err.code),
                        (b'M', &err.message),
                        (b'D', &err.detail),
                        (b'H', &err.hint),
                        (b'q', &err.internal_query),
                        (b'W', &err.where_clause),
                        (b's', &err.schema_name),
                        (b't', &err.table_name),
                        (b'c', &err.column_name),
                        (b'd', &err.data_type_name),
                        (b'n', &err.constraint_name),
                        (b'F', &err.file),
                        (b'R', &err.routine),
                    ];
                    for (tag, value) in fields {
                        if !value.is_empty() {
                            body.push(tag);
                            put_cstr(body, value);
                        }
                    }
                    body.push(0);
                });
            }
        }
    }
}

/// Write a type byte, a length placeholder, the body, then backfill the
/// length (which counts itself but not the type byte).
fn frame(buf: &mut Vec<u8>, msg_type: u8, build: impl FnOnce(&mut Vec<u8>)) {
    buf.push(msg_type);
    let len_at = buf.len();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    build(buf);
    let len = (buf.len() - len_at) as u32;
    buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Encode every message into one contiguous buffer and write it with a
/// single call.
pub async fn write_messages<W>(writer: &mut W, messages: &[BackendMessage]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    for message in messages {
        debug!(message = ?message, "[send]");
        message.encode(&mut buf);
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads frontend messages off a client socket. Stateless, so the underlying
/// stream can be taken over mid-handshake for a TLS upgrade.
pub struct MessageReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the startup-phase message, which has no type byte.
    pub async fn receive_startup(&mut self) -> Result<StartupRequest> {
        let len = self.inner.read_u32().await? as usize;
        if !(8..=MAX_MESSAGE_LEN).contains(&len) {
            return Err(GatewayError::Protocol(format!(
                "invalid startup message length: {}",
                len
            )));
        }
        let mut body = vec![0u8; len - 4];
        self.inner.read_exact(&mut body).await?;

        let code = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        match code {
            SSL_REQUEST_CODE => Ok(StartupRequest::SslRequest),
            CANCEL_REQUEST_CODE => Ok(StartupRequest::CancelRequest),
            PROTOCOL_VERSION => {
                let mut parameters = HashMap::new();
                let mut payload = Payload::new(&body[4..]);
                loop {
                    let name = payload.cstr()?;
                    if name.is_empty() {
                        break;
                    }
                    let value = payload.cstr()?;
                    parameters.insert(name, value);
                }
                Ok(StartupRequest::Startup { parameters })
            }
            other => Err(GatewayError::Protocol(format!(
                "unsupported startup request code: {}",
                other
            ))),
        }
    }

    /// Read one typed frontend message.
    pub async fn receive(&mut self) -> Result<FrontendMessage> {
        let msg_type = self.inner.read_u8().await?;
        let len = self.inner.read_u32().await? as usize;
        if !(4..=MAX_MESSAGE_LEN).contains(&len) {
            return Err(GatewayError::Protocol(format!(
                "invalid message length: {}",
                len
            )));
        }
        let mut body = vec![0u8; len - 4];
        self.inner.read_exact(&mut body).await?;
        let mut payload = Payload::new(&body);

        let message = match msg_type {
            b'Q' => FrontendMessage::Query {
                sql: payload.cstr()?,
            },
            b'P' => {
                let name = payload.cstr()?;
                let sql = payload.cstr()?;
                let count = payload.i16()?;
                let mut parameter_oids = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    parameter_oids.push(payload.u32()?);
                }
                FrontendMessage::Parse {
                    name,
                    sql,
                    parameter_oids,
                }
            }
            b'B' => {
                let portal = payload.cstr()?;
                let statement = payload.cstr()?;
                let format_count = payload.i16()?;
                let mut parameter_format_codes = Vec::with_capacity(format_count.max(0) as usize);
                for _ in 0..format_count {
                    parameter_format_codes.push(payload.i16()?);
                }
                let parameter_count = payload.i16()?;
                let mut parameters = Vec::with_capacity(parameter_count.max(0) as usize);
                for _ in 0..parameter_count {
                    let value_len = payload.i32()?;
                    if value_len < 0 {
                        parameters.push(None);
                    } else {
                        parameters.push(Some(payload.bytes(value_len as usize)?));
                    }
                }
                let result_count = payload.i16()?;
                let mut result_format_codes = Vec::with_capacity(result_count.max(0) as usize);
                for _ in 0..result_count {
                    result_format_codes.push(payload.i16()?);
                }
                FrontendMessage::Bind(Bind {
                    portal,
                    statement,
                    parameter_format_codes,
                    parameters,
                    result_format_codes,
                })
            }
            b'D' => FrontendMessage::Describe {
                target: payload.u8()?,
                name: payload.cstr()?,
            },
            b'E' => FrontendMessage::Execute {
                portal: payload.cstr()?,
                max_rows: payload.i32()?,
            },
            b'S' => FrontendMessage::Sync,
            b'C' => FrontendMessage::Close {
                target: payload.u8()?,
                name: payload.cstr()?,
            },
            b'p' => FrontendMessage::Password {
                password: payload.cstr()?,
            },
            b'X' => FrontendMessage::Terminate,
            other => {
                return Err(GatewayError::Protocol(format!(
                    "unexpected message type: '{}'",
                    other as char
                )))
            }
        };
        Ok(message)
    }
}

/// Sequential reader over one message body.
struct Payload<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn truncated() -> GatewayError {
        GatewayError::Protocol("truncated message body".into())
    }

    fn cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(Self::truncated)?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(Self::truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.pos + n > self.data.len() {
            return Err(Self::truncated());
        }
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    fn i16(&mut self) -> Result<i16> {
        let b = self.bytes(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
