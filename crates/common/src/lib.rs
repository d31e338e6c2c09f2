//! Shared building blocks for seedcert.
//!
//! Everything in this crate is pure: no I/O, no clocks, no network. The
//! lifecycle manager composes these pieces with storage and ACME adapters.
//!
//! - [`keys`] - deterministic P-256 key derivation from a BIP-39 mnemonic
//! - [`san`] - canonicalization of the certificate's domain names
//! - [`leaf`] - expiry and public key inspection of PEM certificate chains

pub mod errors;
pub mod keys;
pub mod leaf;
pub mod san;

pub use errors::{KeyError, SanError};
pub use keys::{derive_account_key, derive_tls_key, seed_from_mnemonic, DerivedKey, Seed};
pub use leaf::{leaf_certificate_expiry, leaf_pub_matches};
pub use san::{normalize_sans, NormalizedSans};
