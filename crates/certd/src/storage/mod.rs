//! Storage ports
//!
//! The lifecycle manager talks to two narrow capabilities:
//!
//! - [`RemoteStore`] - the durable, shared copy of each domain's certificate
//!   chain (the source of truth across restarts)
//! - [`LocalWriter`] - the files consumed by the local TLS server, rebuilt
//!   from the remote copy plus the derived key whenever needed
//!
//! Adapters: [`HttpCertificateStore`] and [`DisabledStore`] for the remote
//! side, [`FsLocalWriter`] for the local side.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seedcert_common::{DerivedKey, KeyError};
use seedcert_config::Config;
use thiserror::Error;
use tracing::debug;

mod local;
mod remote;

pub use local::{FsLocalWriter, FULLCHAIN_FILE, PRIVKEY_FILE};
pub use remote::{HttpCertificateStore, StaticToken, TokenSource};

/// Errors from either storage port.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote store request failed: {0}")]
    Http(String),

    #[error("remote store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote store rejected credentials (status {0})")]
    Unauthorized(u16),

    #[error("invalid remote store response: {0}")]
    InvalidResponse(String),

    #[error("invalid remote store URL: {0}")]
    InvalidUrl(String),

    #[error("failed to encode private key: {0}")]
    Key(#[from] KeyError),
}

/// Issuance metadata the remote store attaches to a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateMetadata {
    pub issued_at: Option<DateTime<Utc>>,
    /// `None` means the expiry must be read from the leaf certificate
    pub expires_at: Option<DateTime<Utc>>,
}

/// A chain fetched from the remote store.
#[derive(Debug, Clone)]
pub struct RemoteCertificate {
    /// PEM certificate blocks, leaf first
    pub chain_pem: String,
    pub metadata: CertificateMetadata,
}

/// Durable certificate store keyed by primary domain.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the chain for `domain`. `Ok(None)` means not found, which is
    /// distinct from an operational error.
    async fn load(&self, domain: &str) -> Result<Option<RemoteCertificate>, StorageError>;

    /// Persist `chain_pem` for `domain`. The store derives its own metadata.
    async fn store(&self, domain: &str, chain_pem: &str) -> Result<(), StorageError>;
}

/// Writer for the two local files.
///
/// Both methods create `out_dir` when missing and return the absolute path
/// of the written file. Writes replace the whole file.
pub trait LocalWriter: Send + Sync {
    /// Write the full chain, world readable
    fn write_chain(&self, out_dir: &Path, chain_pem: &str) -> Result<PathBuf, StorageError>;

    /// Write the private key as `EC PRIVATE KEY` PEM, owner only
    fn write_key(&self, out_dir: &Path, key: &DerivedKey) -> Result<PathBuf, StorageError>;
}

/// Remote store used when no API endpoint is configured.
///
/// Never finds a certificate and accepts every store, so each run issues.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStore;

#[async_trait]
impl RemoteStore for DisabledStore {
    async fn load(&self, domain: &str) -> Result<Option<RemoteCertificate>, StorageError> {
        debug!(domain = %domain, "Remote store disabled, nothing to load");
        Ok(None)
    }

    async fn store(&self, domain: &str, _chain_pem: &str) -> Result<(), StorageError> {
        debug!(domain = %domain, "Remote store disabled, skipping store");
        Ok(())
    }
}

/// Remote store described by `config`: the HTTP API when `api_url` is set,
/// otherwise [`DisabledStore`].
pub fn remote_store_from_config(config: &Config) -> Result<Arc<dyn RemoteStore>, StorageError> {
    let Some(api_url) = config.api_url.as_deref().filter(|url| !url.trim().is_empty()) else {
        debug!("No remote store configured");
        return Ok(Arc::new(DisabledStore));
    };

    let store = HttpCertificateStore::new(
        api_url,
        config.token_audience.clone(),
        Arc::new(StaticToken::new(config.api_token.clone())),
        &config.user_agent,
        config.timeout,
    )?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_store() {
        let store = DisabledStore;
        assert!(store.load("example.com").await.unwrap().is_none());
        store.store("example.com", "chain").await.unwrap();
    }

    #[test]
    fn test_remote_store_from_config() {
        let mut config = Config::new("m", "example.com");
        assert!(remote_store_from_config(&config).is_ok());

        config.api_url = Some("https://certs.example.com/v1".to_string());
        assert!(remote_store_from_config(&config).is_ok());

        config.api_url = Some("not a url".to_string());
        assert!(matches!(
            remote_store_from_config(&config),
            Err(StorageError::InvalidUrl(_))
        ));
    }
}
