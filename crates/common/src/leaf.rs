//! Leaf certificate inspection
//!
//! A chain is one or more concatenated PEM `CERTIFICATE` blocks, leaf first.
//! Neither helper returns an error: malformed input means "unknown" for the
//! expiry and "no match" for the key check.

use chrono::{DateTime, Utc};
use p256::PublicKey;
use tracing::trace;
use x509_parser::pem::Pem;
use x509_parser::public_key::PublicKey as X509PublicKey;

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Expiry (`notAfter`) of the first certificate block in `chain_pem` that
/// parses. `None` when no block parses.
pub fn leaf_certificate_expiry(chain_pem: &[u8]) -> Option<DateTime<Utc>> {
    for block in Pem::iter_from_buffer(chain_pem) {
        let pem = match block {
            Ok(pem) => pem,
            Err(e) => {
                trace!(error = %e, "Skipping undecodable PEM block");
                continue;
            }
        };

        if pem.label != CERTIFICATE_LABEL {
            continue;
        }

        match pem.parse_x509() {
            Ok(cert) => {
                return DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0);
            }
            Err(e) => {
                trace!(error = %e, "Skipping unparsable certificate block");
            }
        }
    }

    None
}

/// Whether the first PEM block of `chain_pem` is a certificate whose public
/// key is the P-256 key `expected`.
pub fn leaf_pub_matches(chain_pem: &[u8], expected: &PublicKey) -> bool {
    let Some(Ok(pem)) = Pem::iter_from_buffer(chain_pem).next() else {
        return false;
    };

    if pem.label != CERTIFICATE_LABEL {
        return false;
    }

    let Ok(cert) = pem.parse_x509() else {
        return false;
    };

    match cert.public_key().parsed() {
        Ok(X509PublicKey::EC(point)) => PublicKey::from_sec1_bytes(point.data())
            .map(|actual| &actual == expected)
            .unwrap_or(false),
        _ => false,
    }
}
