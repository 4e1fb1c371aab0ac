//! TLS configuration for the PostgreSQL listener
//!
//! A single PEM file carries both the certificate chain and the private key.
//! Client certificates are not requested.

use crate::error::{GatewayError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Load a rustls server config from one PEM file containing certificate(s)
/// and key.
pub fn load_tls_config(pem_path: &Path) -> Result<Arc<rustls::ServerConfig>> {
    if !pem_path.exists() {
        return Err(GatewayError::Tls(format!(
            "{} file does not exist",
            pem_path.display()
        )));
    }

    info!(file = %pem_path.display(), "loading TLS keypair from .pem file");
    let pem_bytes = std::fs::read(pem_path)?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(&pem_bytes[..]))
        .collect::<std::io::Result<_>>()
        .map_err(|e| GatewayError::Tls(format!("invalid certificate in {}: {}", pem_path.display(), e)))?;
    if certs.is_empty() {
        return Err(GatewayError::Tls(format!(
            "no certificate found in {}",
            pem_path.display()
        )));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(&pem_bytes[..]))
        .map_err(|e| GatewayError::Tls(format!("invalid private key in {}: {}", pem_path.display(), e)))?
        .ok_or_else(|| GatewayError::Tls(format!("no private key found in {}", pem_path.display())))?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    Ok(Arc::new(server_config))
}

/// Build the async TLS acceptor used to upgrade a client socket after an
/// accepted SSLRequest.
pub fn acceptor(config: Arc<rustls::ServerConfig>) -> TlsAcceptor {
    TlsAcceptor::from(config)
}
