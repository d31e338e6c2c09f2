//! Error types shared by the derivation and normalization helpers.

use thiserror::Error;

/// Errors produced while turning a mnemonic into key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The mnemonic is not a valid BIP-39 phrase
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// HKDF refused the requested output length
    #[error("key expansion failed: {0}")]
    Expand(String),

    /// No candidate mapped onto a valid P-256 scalar
    #[error("key derivation exhausted after {attempts} attempts")]
    DerivationExhausted { attempts: usize },

    /// The key could not be serialized
    #[error("key encoding failed: {0}")]
    Encoding(String),
}

/// Errors produced while normalizing subject alternative names.
#[derive(Debug, Error)]
pub enum SanError {
    #[error("domain name is empty")]
    Empty,

    #[error("invalid domain name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}
