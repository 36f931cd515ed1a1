//! TLS acceptor for the streaming server
//!
//! Enabled by a `[server.tls]` section with PEM certificate and key paths.

use crate::config::TlsConfig;
use crate::error::Result;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::{rustls, TlsAcceptor};
use tracing::info;

/// Build a TLS acceptor from the configured certificate chain and key
///
/// # Errors
///
/// - [`TrackingError::Io`](crate::error::TrackingError::Io) - A file could not be read or parsed
/// - [`TrackingError::Io`](crate::error::TrackingError::Io) - Certificate and key do not form a valid server config
pub fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&config.cert)?;
    let key = load_key(&config.key)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| invalid_input(format!("TLS config error: {}", e)))?;

    info!(cert = %config.cert, key = %config.key, "TLS enabled");
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| invalid_data(format!("Failed to parse certificates in {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(invalid_data(format!("No certificate found in {}", path)));
    }
    Ok(certs)
}

// PKCS8, PKCS1 and SEC1 keys are all accepted
fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path, "key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| invalid_data(format!("Failed to parse private key in {}: {}", path, e)))?
        .ok_or_else(|| invalid_data(format!("No private key found in {}", path)))
}

fn open(path: &str, what: &str) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("Failed to open {} file {}: {}", what, path, e))
    })?;
    Ok(BufReader::new(file))
}

fn invalid_data(message: String) -> crate::error::TrackingError {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message).into()
}

fn invalid_input(message: String) -> crate::error::TrackingError {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, message).into()
}
