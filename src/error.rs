//! Error types for the gateway

use crate::backend::DriverError;

/// Result type alias using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for gateway sessions and subsystems
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The client violated the wire protocol; fatal for the session
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Startup handshake failed; the session ends after the error reply
    #[error("startup failed: {0}")]
    Startup(String),

    /// A statement could not be parsed into a recognized command shape
    #[error("unable to parse query: {0}")]
    QueryParse(String),

    /// FETCH or CLOSE referenced a cursor that is not in the session map
    #[error("cursor \"{0}\" does not exist")]
    UnknownCursor(String),

    /// Bind or Describe referenced a statement that is not in the session map
    #[error("prepared statement \"{0}\" does not exist")]
    UnknownPreparedStatement(String),

    /// A row value could not be encoded for the wire
    #[error("{0}")]
    Encode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server-wide shutdown token fired
    #[error("session cancelled")]
    Cancelled,

    /// Backend driver error
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Socket or file IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_objects_render_quoted_names() {
        assert_eq!(
            GatewayError::UnknownPreparedStatement("stmt1".into()).to_string(),
            "prepared statement \"stmt1\" does not exist"
        );
        assert_eq!(
            GatewayError::UnknownCursor("cur".into()).to_string(),
            "cursor \"cur\" does not exist"
        );
    }
}
