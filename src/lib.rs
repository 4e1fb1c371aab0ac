//! PostgreSQL wire protocol gateway for Vertica analytics databases.
//!
//! Speaks the PostgreSQL v3 frontend/backend protocol to clients while
//! executing their SQL against two backends: a Vertica-style columnar store
//! and a real PostgreSQL instance. Clients (Tableau, PowerBI, DBeaver, psql)
//! see a single PostgreSQL server; the gateway routes each statement by query
//! shape and a configured list of synchronized schemas, rewriting SQL where
//! the dialects differ.
//!
//! ## Architecture
//!
//! 1. Connection arrives → optional SSL upgrade → startup handshake opens one
//!    Vertica and one PostgreSQL session per client
//! 2. Simple and extended query protocols run through the per-session
//!    [`pg_wire::executor::QueryExecutor`]
//! 3. SELECTs over synchronized schemas go to Vertica (dialect-rewritten);
//!    catalog and everything else goes to PostgreSQL
//! 4. Result rows stream back in bounded batches of wire messages
//!
//! The [`schema_sync::SchemaSynchronizer`] is a separate one-shot job that
//! mirrors Vertica schemas, tables, and roles into PostgreSQL so that catalog
//! introspection by BI tools resolves there.
//!
//! Backend drivers are not part of this crate: the [`backend`] module defines
//! the opener/session/row-stream traits an embedding binary implements.

pub mod backend;
pub mod config;
pub mod error;
pub mod pg_wire;
pub mod query_rewrite;
pub mod query_router;
pub mod schema_sync;
pub mod telemetry;
pub mod tls_config;

pub use config::ServerConfig;
pub use error::{GatewayError, Result};
pub use pg_wire::server::Server;
pub use schema_sync::SchemaSynchronizer;
