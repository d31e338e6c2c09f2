//! ACME settings validation

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::{ChallengeKind, Config};

/// Certificates from public CAs are currently valid for 90 days
const TYPICAL_LIFETIME_SECS: u64 = 90 * 24 * 3600;

/// Validate the CA directory and challenge settings
pub fn validate_acme(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    match url::Url::parse(&config.ca_dir) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            if url.scheme() == "http" {
                result.add_warning(ValidationWarning::new(format!(
                    "ACME directory '{}' is not served over HTTPS",
                    config.ca_dir
                )));
            }
        }
        Ok(url) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Acme,
                format!("ACME directory has unsupported scheme '{}'", url.scheme()),
            ));
        }
        Err(e) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Acme,
                format!("invalid ACME directory URL '{}': {}", config.ca_dir, e),
            ));
        }
    }

    if config.is_staging() {
        result.add_warning(ValidationWarning::new(
            "using a staging ACME directory; issued certificates are not publicly trusted",
        ));
    }

    let (port, standard) = match config.challenge {
        ChallengeKind::Http01 => (config.http_port, 80),
        ChallengeKind::TlsAlpn01 => (config.tls_port, 443),
    };
    if port == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Acme,
            format!("{} responder port must not be 0", config.challenge),
        ));
    } else if port != standard {
        result.add_warning(ValidationWarning::new(format!(
            "{} responder listens on port {}; the CA connects to port {}, so traffic must be forwarded",
            config.challenge, port, standard
        )));
    }

    if config.renewal_window.as_secs() >= TYPICAL_LIFETIME_SECS {
        result.add_warning(ValidationWarning::new(
            "renewal window is at least 90 days; most certificates will be reissued on every run",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> Config {
        Config::new("m", "example.com")
    }

    #[test]
    fn test_invalid_directory_url() {
        let mut config = config();
        config.ca_dir = "not a url".to_string();
        let result = validate_acme(&config);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Acme);
    }

    #[test]
    fn test_unsupported_scheme() {
        let mut config = config();
        config.ca_dir = "ftp://acme.example/directory".to_string();
        assert!(!validate_acme(&config).is_ok());
    }

    #[test]
    fn test_staging_warns() {
        let result = validate_acme(&config().staging());
        assert!(result.is_ok());
        assert!(result.warnings.iter().any(|w| w.message.contains("staging")));
    }

    #[test]
    fn test_port_checks_follow_challenge() {
        let mut config = config();
        config.challenge = ChallengeKind::TlsAlpn01;
        config.http_port = 0;
        assert!(validate_acme(&config).is_ok());

        config.tls_port = 0;
        assert!(!validate_acme(&config).is_ok());

        config.tls_port = 8443;
        let result = validate_acme(&config);
        assert!(result.is_ok());
        assert!(result.warnings.iter().any(|w| w.message.contains("8443")));
    }

    #[test]
    fn test_long_window_warns() {
        let mut config = config();
        config.renewal_window = Duration::from_secs(TYPICAL_LIFETIME_SECS);
        assert!(!validate_acme(&config).warnings.is_empty());
    }
}
