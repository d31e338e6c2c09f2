//! Lifecycle error type

use std::time::Duration;

use seedcert_common::{KeyError, SanError};
use seedcert_config::ConfigError;
use thiserror::Error;

use crate::acme::AcmeError;
use crate::storage::StorageError;

/// Errors returned by [`CertificateManager::ensure_certificate`].
///
/// [`CertificateManager::ensure_certificate`]: crate::CertificateManager::ensure_certificate
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid domain name: {0}")]
    San(#[from] SanError),

    #[error("key derivation failed: {0}")]
    Key(#[from] KeyError),

    /// The certificate's public key is not the derived TLS key. Nothing was
    /// written locally.
    #[error("key mismatch: certificate for '{domain}' does not match the derived TLS key")]
    KeyMismatch { domain: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("certificate issuance failed: {0}")]
    Acme(#[from] AcmeError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl LifecycleError {
    /// Whether this is the key mismatch integrity failure
    pub fn is_key_mismatch(&self) -> bool {
        matches!(self, LifecycleError::KeyMismatch { .. })
    }
}
