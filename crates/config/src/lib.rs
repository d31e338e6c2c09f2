//! Seedcert configuration
//!
//! [`Config`] is the single input of a certificate lifecycle run. It is built
//! by the caller (CLI flags, a TOML file, or code) and is immutable for the
//! duration of one `ensure_certificate` call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

mod error;
pub mod validate;

pub use error::ConfigError;
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Let's Encrypt production directory
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// ACME challenge used to prove control of the domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChallengeKind {
    /// HTTP-01, answered on TCP port 80
    #[default]
    #[serde(rename = "http-01")]
    Http01,
    /// TLS-ALPN-01, answered on TCP port 443
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl ChallengeKind {
    /// Canonical ACME name of the challenge
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http-01" | "http01" | "http" => Ok(ChallengeKind::Http01),
            "tls-alpn-01" | "tlsalpn01" | "tls-alpn" => Ok(ChallengeKind::TlsAlpn01),
            _ => Err(ConfigError::UnsupportedChallenge(s.to_string())),
        }
    }
}

/// Input of a certificate lifecycle run.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// BIP-39 mnemonic all key material is derived from
    #[serde(skip_serializing)]
    pub mnemonic: String,

    /// Primary domain; becomes the certificate CN and the remote store key
    pub domain: String,

    /// Additional subject alternative names
    pub alt_names: Vec<String>,

    /// Directory receiving `fullchain.pem` and `privkey.pem`
    pub out_dir: PathBuf,

    /// ACME account contact; empty registers without a contact
    pub email: String,

    /// ACME directory URL
    pub ca_dir: String,

    /// Issue a new certificate even when a valid one exists
    pub force_issue: bool,

    /// Renew when the certificate expires within this window
    #[serde(with = "duration_secs")]
    pub renewal_window: Duration,

    /// Challenge used for domain validation
    pub challenge: ChallengeKind,

    /// Upper bound for each network step
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Base URL of the remote certificate store
    pub api_url: Option<String>,

    /// Audience requested when minting the remote store token
    pub token_audience: Option<String>,

    /// Static bearer token for the remote store
    #[serde(skip_serializing)]
    pub api_token: Option<String>,

    /// Key rotation counter mixed into the TLS key
    pub version: u32,

    /// User agent for outbound HTTP requests
    pub user_agent: String,

    /// Port of the HTTP-01 responder
    pub http_port: u16,

    /// Port of the TLS-ALPN-01 responder
    pub tls_port: u16,
}

fn default_renewal_window() -> Duration {
    Duration::from_secs(30 * 24 * 3600)
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    format!("seedcert/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mnemonic: String::new(),
            domain: String::new(),
            alt_names: Vec::new(),
            out_dir: PathBuf::from("."),
            email: String::new(),
            ca_dir: LETS_ENCRYPT_PRODUCTION.to_string(),
            force_issue: false,
            renewal_window: default_renewal_window(),
            challenge: ChallengeKind::default(),
            timeout: default_timeout(),
            api_url: None,
            token_audience: None,
            api_token: None,
            version: 0,
            user_agent: default_user_agent(),
            http_port: 80,
            tls_port: 443,
        }
    }
}

impl Config {
    /// Create a configuration for `domain` with defaults everywhere else.
    pub fn new(mnemonic: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// Switch to the Let's Encrypt staging directory.
    pub fn staging(mut self) -> Self {
        self.ca_dir = LETS_ENCRYPT_STAGING.to_string();
        self
    }

    /// Whether the configured directory is a staging environment.
    pub fn is_staging(&self) -> bool {
        self.ca_dir.contains("staging")
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&content)
    }

    /// Check the configuration.
    ///
    /// A missing required field is reported as [`ConfigError::MissingField`].
    /// Otherwise every error found is joined into one
    /// [`ConfigError::Invalid`] message.
    ///
    /// Warnings are returned for the caller to log.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>, ConfigError> {
        let result = validate::validate_config(self);
        if result.errors.is_empty() {
            return Ok(result.warnings);
        }

        // Missing required fields get a dedicated variant
        if let Some(field) = result.errors.iter().find_map(|e| e.missing_field()) {
            return Err(ConfigError::MissingField(field));
        }

        Err(ConfigError::Invalid(
            result
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        ))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("mnemonic", &"<redacted>")
            .field("domain", &self.domain)
            .field("alt_names", &self.alt_names)
            .field("out_dir", &self.out_dir)
            .field("email", &self.email)
            .field("ca_dir", &self.ca_dir)
            .field("force_issue", &self.force_issue)
            .field("renewal_window", &self.renewal_window)
            .field("challenge", &self.challenge)
            .field("timeout", &self.timeout)
            .field("api_url", &self.api_url)
            .field("token_audience", &self.token_audience)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("version", &self.version)
            .field("user_agent", &self.user_agent)
            .field("http_port", &self.http_port)
            .field("tls_port", &self.tls_port)
            .finish()
    }
}

/// Durations as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
