//! ACME error types

use std::time::Duration;

use seedcert_common::KeyError;
use thiserror::Error;

/// Errors from certificate issuance.
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("ACME account registration failed: {0}")]
    Account(String),

    #[error("ACME order failed: {0}")]
    Order(String),

    #[error("ACME challenge failed for '{domain}': {message}")]
    Challenge { domain: String, message: String },

    #[error("no {challenge} challenge offered for '{domain}'")]
    NoChallenge {
        domain: String,
        challenge: &'static str,
    },

    #[error("ACME order finalization failed: {0}")]
    Finalize(String),

    #[error("failed to build certificate request: {0}")]
    Csr(String),

    #[error("failed to start challenge responder on port {port}: {source}")]
    Responder {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("ACME step '{step}' timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },

    #[error("key encoding error: {0}")]
    Key(#[from] KeyError),
}

impl From<rcgen::Error> for AcmeError {
    fn from(e: rcgen::Error) -> Self {
        AcmeError::Csr(e.to_string())
    }
}
