//! Seedcert - Main entry point
//!
//! Ensures a certificate for one domain and prints the resulting bundle as
//! JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use seedcert::{
    remote_store_from_config, system_clock, AcmeAuthority, CertificateManager, FsLocalWriter,
};
use seedcert_config::{ChallengeKind, Config};

/// Seedcert - deterministic TLS certificates from a mnemonic
#[derive(Parser, Debug)]
#[command(name = "seedcert")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML); flags override its values
    #[arg(short = 'c', long = "config", env = "SEEDCERT_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// BIP-39 mnemonic all keys are derived from
    #[arg(long = "mnemonic", env = "SEEDCERT_MNEMONIC", hide_env_values = true)]
    mnemonic: Option<String>,

    /// Primary domain
    #[arg(short = 'd', long = "domain", env = "SEEDCERT_DOMAIN")]
    domain: Option<String>,

    /// Additional names, comma separated
    #[arg(long = "alt-names", env = "SEEDCERT_ALT_NAMES", value_delimiter = ',')]
    alt_names: Vec<String>,

    /// Directory receiving fullchain.pem and privkey.pem
    #[arg(short = 'o', long = "out-dir", env = "SEEDCERT_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// ACME account contact email
    #[arg(long = "email", env = "SEEDCERT_EMAIL")]
    email: Option<String>,

    /// ACME directory URL
    #[arg(long = "ca-dir", env = "SEEDCERT_CA_DIR")]
    ca_dir: Option<String>,

    /// Use the Let's Encrypt staging directory
    #[arg(long = "staging")]
    staging: bool,

    /// Issue even when a valid certificate exists
    #[arg(long = "force", env = "SEEDCERT_FORCE_ISSUE")]
    force_issue: bool,

    /// Renewal window in seconds
    #[arg(long = "renewal-window", env = "SEEDCERT_RENEWAL_WINDOW")]
    renewal_window: Option<u64>,

    /// Challenge type: http-01 or tls-alpn-01
    #[arg(long = "challenge", env = "SEEDCERT_CHALLENGE")]
    challenge: Option<ChallengeKind>,

    /// Timeout for each network step in seconds
    #[arg(long = "timeout", env = "SEEDCERT_TIMEOUT")]
    timeout: Option<u64>,

    /// Remote certificate store base URL
    #[arg(long = "api-url", env = "SEEDCERT_API_URL")]
    api_url: Option<String>,

    /// Audience of the remote store token
    #[arg(long = "token-audience", env = "SEEDCERT_TOKEN_AUDIENCE")]
    token_audience: Option<String>,

    /// Bearer token for the remote store
    #[arg(long = "api-token", env = "SEEDCERT_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Key rotation counter
    #[arg(long = "key-version", env = "SEEDCERT_KEY_VERSION")]
    version: Option<u32>,

    /// User agent for outbound requests
    #[arg(long = "user-agent", env = "SEEDCERT_USER_AGENT")]
    user_agent: Option<String>,

    /// Port of the HTTP-01 responder
    #[arg(long = "http-port", env = "SEEDCERT_HTTP_PORT")]
    http_port: Option<u16>,

    /// Port of the TLS-ALPN-01 responder
    #[arg(long = "tls-port", env = "SEEDCERT_TLS_PORT")]
    tls_port: Option<u16>,
}

impl Cli {
    /// Configuration file (if any) with flags applied on top
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(mnemonic) = self.mnemonic {
            config.mnemonic = mnemonic;
        }
        if let Some(domain) = self.domain {
            config.domain = domain;
        }
        if !self.alt_names.is_empty() {
            config.alt_names = self.alt_names;
        }
        if let Some(out_dir) = self.out_dir {
            config.out_dir = out_dir;
        }
        if let Some(email) = self.email {
            config.email = email;
        }
        if let Some(ca_dir) = self.ca_dir {
            config.ca_dir = ca_dir;
        }
        if self.staging {
            config = config.staging();
        }
        config.force_issue |= self.force_issue;
        if let Some(secs) = self.renewal_window {
            config.renewal_window = Duration::from_secs(secs);
        }
        if let Some(challenge) = self.challenge {
            config.challenge = challenge;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if self.api_url.is_some() {
            config.api_url = self.api_url;
        }
        if self.token_audience.is_some() {
            config.token_audience = self.token_audience;
        }
        if self.api_token.is_some() {
            config.api_token = self.api_token;
        }
        if let Some(version) = self.version {
            config.version = version;
        }
        if let Some(user_agent) = self.user_agent {
            config.user_agent = user_agent;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(port) = self.tls_port {
            config.tls_port = port;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let test_only = cli.test;
    let config = cli.into_config()?;

    if test_only {
        return test_config(&config);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let bundle = runtime.block_on(async {
        let manager = CertificateManager::new(
            remote_store_from_config(&config).context("Failed to configure remote store")?,
            Arc::new(FsLocalWriter::new()),
            Arc::new(AcmeAuthority::new()),
            system_clock(),
        );
        manager
            .ensure_certificate(&config)
            .await
            .with_context(|| format!("Failed to ensure certificate for {}", config.domain))
    })?;

    info!(
        domain = %bundle.primary,
        issued = bundle.issued,
        reconstructed = bundle.reconstructed,
        expires = %bundle.not_after,
        "Certificate ready"
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&bundle).context("Failed to encode bundle")?
    );
    Ok(())
}

/// Validate the configuration and exit
fn test_config(config: &Config) -> Result<()> {
    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    info!(
        domain = %config.domain,
        challenge = %config.challenge,
        directory = %config.ca_dir,
        staging = config.is_staging(),
        "Configuration test successful"
    );
    println!("seedcert: configuration test is successful");
    Ok(())
}
