//! Seedcert
//!
//! Deterministic TLS certificate lifecycle management. All key material is
//! derived from one BIP-39 mnemonic, so a host that lost its local files can
//! rebuild them from the remote certificate store without contacting the CA,
//! and a certificate only has to be issued when none exists or the existing
//! one is about to expire.
//!
//! The crate provides:
//!
//! - **Lifecycle manager**: [`CertificateManager::ensure_certificate`], the
//!   install-or-issue decision engine
//! - **Storage ports**: [`RemoteStore`] and [`LocalWriter`] with HTTP and
//!   filesystem adapters
//! - **ACME issuance**: [`CertificateAuthority`] implemented by
//!   [`AcmeAuthority`], with in-process HTTP-01 and TLS-ALPN-01 responders
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use seedcert::{system_clock, AcmeAuthority, CertificateManager, FsLocalWriter};
//! use seedcert_config::Config;
//!
//! let config = Config::new(mnemonic, "example.com").staging();
//! let manager = CertificateManager::new(
//!     seedcert::remote_store_from_config(&config)?,
//!     Arc::new(FsLocalWriter::new()),
//!     Arc::new(AcmeAuthority::new()),
//!     system_clock(),
//! );
//! let bundle = manager.ensure_certificate(&config).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod error;
pub mod manager;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Lifecycle
pub use error::LifecycleError;
pub use manager::{
    evaluate_renewal, system_clock, Bundle, CertificateManager, Clock, IssueReason,
    RenewalDecision,
};

// Storage
pub use storage::{
    remote_store_from_config, CertificateMetadata, DisabledStore, FsLocalWriter,
    HttpCertificateStore, LocalWriter, RemoteCertificate, RemoteStore, StaticToken,
    StorageError, TokenSource,
};

// Issuance
pub use acme::{AcmeAuthority, AcmeError, CertificateAuthority, IssueRequest};

// Key material and names
pub use seedcert_common::{DerivedKey, NormalizedSans};
