//! PostgreSQL wire protocol implementation
//!
//! ## Module structure
//!
//! - `protocol` - message codec, type OIDs, and protocol constants
//! - `buffer` - outbound message queue with single-write flush
//! - `row_encoder` - backend row values → wire representation
//! - `statement` - prepared statements and parameter binding
//! - `cursor` - DECLARE/FETCH/CLOSE server-side cursors
//! - `startup` - SSL negotiation and the startup handshake
//! - `executor` - per-session simple and extended query state machine
//! - `server` - listener, session registry, and shutdown

pub mod buffer;
pub mod cursor;
pub mod executor;
pub mod protocol;
pub mod row_encoder;
pub mod server;
pub mod startup;
pub mod statement;

use tokio::io::{AsyncRead, AsyncWrite};

/// A client socket, plain or TLS-wrapped.
pub trait ClientStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ClientStream for T {}

#[cfg(test)]
pub(crate) mod testutil;
