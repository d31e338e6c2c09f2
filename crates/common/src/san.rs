//! Subject alternative name normalization
//!
//! Names are trimmed, lower-cased and converted to their ASCII (punycode)
//! form. The primary domain always comes first; extra names are appended in
//! order and duplicates are dropped after normalization.

use tracing::trace;

use crate::errors::SanError;

/// Maximum length of a single DNS label
const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a full DNS name
const MAX_NAME_LEN: usize = 253;

/// Normalized certificate names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSans {
    primary: String,
    sans: Vec<String>,
}

impl NormalizedSans {
    /// The canonical primary domain, used as the certificate CN
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// All names, primary first
    pub fn sans(&self) -> &[String] {
        &self.sans
    }

    /// Consume into the list of names
    pub fn into_sans(self) -> Vec<String> {
        self.sans
    }
}

/// Normalize the primary domain and any additional names.
///
/// Blank entries in `extras` are skipped. Any other name that cannot be
/// encoded as an ASCII DNS name fails the whole call.
pub fn normalize_sans<S: AsRef<str>>(domain: &str, extras: &[S]) -> Result<NormalizedSans, SanError> {
    let primary = normalize_name(domain)?;
    let mut sans = vec![primary.clone()];

    for extra in extras {
        let extra = extra.as_ref();
        if extra.trim().is_empty() {
            continue;
        }
        let name = normalize_name(extra)?;
        if sans.contains(&name) {
            trace!(name = %name, "Dropping duplicate SAN");
            continue;
        }
        sans.push(name);
    }

    Ok(NormalizedSans { primary, sans })
}

fn normalize_name(raw: &str) -> Result<String, SanError> {
    let lowered = raw.trim().trim_end_matches('.').to_lowercase();
    if lowered.is_empty() {
        return Err(SanError::Empty);
    }

    // Wildcards need DNS-01, which is not an available challenge
    if lowered.split('.').any(|label| label.contains('*')) {
        return Err(SanError::InvalidName {
            name: raw.to_string(),
            reason: "wildcard names cannot be validated over HTTP-01 or TLS-ALPN-01".to_string(),
        });
    }

    let ascii = idna::domain_to_ascii(&lowered).map_err(|e| SanError::InvalidName {
        name: raw.to_string(),
        reason: format!("not IDNA encodable: {}", e),
    })?;

    check_dns_syntax(&ascii).map_err(|reason| SanError::InvalidName {
        name: raw.to_string(),
        reason,
    })?;

    Ok(ascii)
}

/// Hostname rules on the ASCII form: LDH labels and RFC 1035 length limits.
fn check_dns_syntax(name: &str) -> Result<(), String> {
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name exceeds {} characters", MAX_NAME_LEN));
    }

    for label in name.split('.') {
        if label.is_empty() {
            return Err("empty label".to_string());
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(format!("label '{}' exceeds {} characters", label, MAX_LABEL_LEN));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{}' starts or ends with a hyphen", label));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(format!("label '{}' contains '{}'", label, c));
        }
    }

    Ok(())
}
