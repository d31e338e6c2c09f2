//! Remote store settings validation

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Validate the remote certificate store endpoint
pub fn validate_storage(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let Some(api_url) = config.api_url.as_deref() else {
        if config.token_audience.is_some() || config.api_token.is_some() {
            result.add_warning(ValidationWarning::new(
                "remote store credentials are set but no API URL is configured",
            ));
        }
        return result;
    };

    match url::Url::parse(api_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Storage,
                format!("remote store URL has unsupported scheme '{}'", url.scheme()),
            ));
        }
        Err(e) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Storage,
                format!("invalid remote store URL '{}': {}", api_url, e),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_remote_store_is_fine() {
        let config = Config::new("m", "example.com");
        let result = validate_storage(&config);
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_orphan_credentials_warn() {
        let mut config = Config::new("m", "example.com");
        config.token_audience = Some("seedcert".to_string());
        assert_eq!(validate_storage(&config).warnings.len(), 1);
    }

    #[test]
    fn test_invalid_api_url() {
        let mut config = Config::new("m", "example.com");
        config.api_url = Some("::nope".to_string());
        let result = validate_storage(&config);
        assert_eq!(result.errors[0].category, ErrorCategory::Storage);
    }
}
