//! ACME certificate issuance
//!
//! The lifecycle manager depends on the [`CertificateAuthority`] trait only.
//! [`AcmeAuthority`] implements it on top of `instant-acme`:
//!
//! 1. Register (or look up) the account bound to the derived account key
//! 2. Create an order for every normalized name
//! 3. Answer each authorization with HTTP-01 on the HTTP port or
//!    TLS-ALPN-01 on the TLS port, served in-process for the duration of
//!    the order
//! 4. Finalize with a CSR signed by the derived TLS key
//! 5. Download the PEM chain
//!
//! # Challenge Flow
//!
//! ```text
//! AcmeAuthority ──new_order──▶ CA
//!       │                      │
//!       ├─ register token ──▶ Http01Challenges / AlpnCertResolver
//!       │                      │
//!       ├─ set_ready ────────▶ │ ──validation request──▶ responder
//!       │                      │
//!       └─ poll, finalize ───▶ │ ──chain──▶ caller
//! ```

use std::time::Duration;

use async_trait::async_trait;
use seedcert_common::{DerivedKey, NormalizedSans};
use seedcert_config::ChallengeKind;

mod alpn;
mod challenge;
mod client;
mod error;

pub use alpn::{AlpnCertResolver, TlsAlpnResponder, ACME_TLS_ALPN_PROTOCOL};
pub use challenge::{Http01Challenges, Http01Responder, ACME_CHALLENGE_PREFIX};
pub use client::AcmeAuthority;
pub use error::AcmeError;

/// Everything needed to obtain one certificate.
#[derive(Debug, Clone, Copy)]
pub struct IssueRequest<'a> {
    /// Names on the certificate, primary first
    pub names: &'a NormalizedSans,
    /// Key identifying the ACME account
    pub account_key: &'a DerivedKey,
    /// Key the certificate is issued for
    pub tls_key: &'a DerivedKey,
    /// Account contact; empty for none
    pub email: &'a str,
    /// ACME directory URL
    pub directory_url: &'a str,
    pub challenge: ChallengeKind,
    /// Port of the HTTP-01 responder
    pub http_port: u16,
    /// Port of the TLS-ALPN-01 responder
    pub tls_port: u16,
    /// Upper bound for each network step
    pub timeout: Duration,
}

/// Source of newly issued certificates.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Obtain a certificate for `request.names` bound to `request.tls_key`
    /// and return the PEM chain, leaf first.
    async fn issue(&self, request: IssueRequest<'_>) -> Result<String, AcmeError>;
}
