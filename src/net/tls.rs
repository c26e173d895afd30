use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use tracing::info;
use wtransport::Identity;

use crate::config::ServerConfig;

/// TLS identity for the WebTransport endpoint
pub struct TlsIdentity {
    identity: Identity,
    /// Base64-encoded SHA-256 hash of the certificate (for browser flag)
    cert_hash: String,
}

impl TlsIdentity {
    /// Load TLS identity
    ///
    /// Production: set tls_cert_path/tls_key_path (TLS_CERT_PATH and
    /// TLS_KEY_PATH env vars). Development: falls back to a fresh
    /// self-signed certificate; the logged hash goes in the browser flag.
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        let identity = match (&config.tls_cert_path, &config.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!("Loading TLS certificate from {}", cert_path);
                Identity::load_pemfiles(cert_path, key_path)
                    .await
                    .context("Failed to load certificate from PEM files")?
            }
            _ => {
                info!("No certificate paths configured, using self-signed");
                Identity::self_signed(["localhost", "127.0.0.1", "::1"])
                    .context("Failed to generate self-signed certificate")?
            }
        };

        let cert_hash = Self::compute_cert_hash(&identity);
        Self::log_cert_info(&cert_hash);

        Ok(Self {
            identity,
            cert_hash,
        })
    }

    fn compute_cert_hash(identity: &Identity) -> String {
        identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|cert| {
                let der_bytes = cert.der();
                let hash = digest(&SHA256, der_bytes);
                STANDARD.encode(hash.as_ref())
            })
            .unwrap_or_default()
    }

    fn log_cert_info(cert_hash: &str) {
        info!("Certificate hash: {}", cert_hash);
        info!(
            "Chrome flag: --ignore-certificate-errors-spki-list={}",
            cert_hash
        );
    }

    /// Certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }

    /// Consume into the wtransport identity for server construction
    pub fn into_identity(self) -> Identity {
        self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_self_signed_fallback() {
        let config = ServerConfig::default();
        let tls = TlsIdentity::load(&config).await.unwrap();
        assert!(!tls.cert_hash().is_empty());
    }

    #[tokio::test]
    async fn test_cert_hash_format() {
        let config = ServerConfig::default();
        let tls = TlsIdentity::load(&config).await.unwrap();
        // Valid base64, SHA-256 produces 32 bytes
        let decoded = STANDARD.decode(tls.cert_hash()).unwrap();
        assert_eq!(decoded.len(), 32);
    }
}
