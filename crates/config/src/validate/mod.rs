//! Configuration validation
//!
//! Checks are grouped by concern. Each check appends to a shared
//! [`ValidationResult`]; errors make the configuration unusable, warnings are
//! logged by the caller.

use std::fmt;

use crate::Config;

mod acme;
mod storage;

pub use acme::validate_acme;
pub use storage::validate_storage;

/// What part of the configuration an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Secret,
    Domain,
    Acme,
    Storage,
    Timing,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Secret => "secret",
            ErrorCategory::Domain => "domain",
            ErrorCategory::Acme => "acme",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Timing => "timing",
        };
        f.write_str(name)
    }
}

/// A configuration error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
    missing: Option<&'static str>,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            missing: None,
        }
    }

    /// A required field that is absent or blank
    pub fn missing(category: ErrorCategory, field: &'static str) -> Self {
        Self {
            category,
            message: format!("{} is required", field),
            missing: Some(field),
        }
    }

    /// Name of the missing field, if that is what this error reports
    pub fn missing_field(&self) -> Option<&'static str> {
        self.missing
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A configuration smell that does not prevent a run
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Collected errors and warnings
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every check against `config`
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.mnemonic.trim().is_empty() {
        result.add_error(ValidationError::missing(ErrorCategory::Secret, "mnemonic"));
    }

    if config.domain.trim().is_empty() {
        result.add_error(ValidationError::missing(ErrorCategory::Domain, "domain"));
    }

    if config.timeout.is_zero() {
        result.add_error(ValidationError::new(
            ErrorCategory::Timing,
            "timeout must be greater than zero",
        ));
    }

    if config.renewal_window.is_zero() {
        result.add_warning(ValidationWarning::new(
            "renewal window is zero; certificates are only replaced after they expire",
        ));
    }

    result.merge(validate_acme(config));
    result.merge(validate_storage(config));

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigError;
    use std::time::Duration;

    fn valid() -> Config {
        Config::new("abandon about", "example.com")
    }

    #[test]
    fn test_valid_config_passes() {
        let result = validate_config(&valid());
        assert!(result.is_ok(), "{:?}", result.errors);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_mnemonic() {
        let mut config = valid();
        config.mnemonic = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("mnemonic"))
        ));
    }

    #[test]
    fn test_missing_domain() {
        let mut config = valid();
        config.domain = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("domain"))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid();
        config.timeout = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("timeout")));
    }

    #[test]
    fn test_zero_window_warns() {
        let mut config = valid();
        config.renewal_window = Duration::ZERO;
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.message.contains("renewal window")));
    }
}
