//! Certificate lifecycle manager
//!
//! [`CertificateManager::ensure_certificate`] decides, for one domain,
//! whether the certificate in the remote store can be installed as is or a
//! new one must be issued:
//!
//! ```text
//! validate ─▶ derive keys ─▶ force? ──yes──────────────────────────▶ issue
//!                              │no
//!                              ▼
//!                        load remote ──error / not found─────────────▶ issue
//!                              │
//!                              ▼
//!                      expiry (metadata, else leaf)
//!                              │
//!            ┌─────────────────┼──────────────────┐
//!        undetermined     expired / window       fresh
//!            │                 │                  │
//!            ▼                 ▼                  ▼
//!          issue             issue      key matches? ──no──▶ KeyMismatch
//!                                                 │yes
//!                                                 ▼
//!                                              install
//! ```
//!
//! Failing to read the remote store degrades to issuance. A certificate
//! whose key is not the derived TLS key is never installed.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use seedcert_common::{
    derive_account_key, derive_tls_key, leaf_certificate_expiry, leaf_pub_matches,
    normalize_sans, seed_from_mnemonic, DerivedKey, NormalizedSans,
};
use seedcert_config::Config;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::acme::{AcmeError, CertificateAuthority, IssueRequest};
use crate::error::LifecycleError;
use crate::storage::{LocalWriter, RemoteStore, StorageError};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall clock
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bundle {
    /// Absolute path of the certificate chain file
    pub full_chain_path: PathBuf,
    /// Absolute path of the private key file
    pub priv_key_path: PathBuf,
    pub not_after: DateTime<Utc>,
    /// A new certificate was obtained from the CA
    pub issued: bool,
    /// The remote certificate was verified and installed without the CA
    pub reconstructed: bool,
    /// Normalized primary domain
    pub primary: String,
    /// Normalized names on the certificate, primary first
    pub sans: Vec<String>,
}

/// Freshness of a stored certificate at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalDecision {
    /// Valid beyond the renewal window
    Fresh,
    /// Past its expiry
    Expired,
    /// Valid, but inside the renewal window
    RenewalWindow,
    /// Expiry unknown
    Undetermined,
}

impl RenewalDecision {
    pub fn needs_issuance(self) -> bool {
        !matches!(self, RenewalDecision::Fresh)
    }
}

/// Classify a certificate expiring at `expiry` as seen at `now`.
///
/// Issuance is due iff `now > expiry` or `now > expiry - window`.
pub fn evaluate_renewal(
    now: DateTime<Utc>,
    expiry: Option<DateTime<Utc>>,
    window: Duration,
) -> RenewalDecision {
    let Some(expiry) = expiry else {
        return RenewalDecision::Undetermined;
    };

    if now > expiry {
        return RenewalDecision::Expired;
    }

    // A window too large to represent reaches back past any timestamp
    let renew_after = TimeDelta::from_std(window)
        .ok()
        .and_then(|window| expiry.checked_sub_signed(window));

    match renew_after {
        Some(renew_after) if now <= renew_after => RenewalDecision::Fresh,
        _ => RenewalDecision::RenewalWindow,
    }
}

/// Why a certificate is being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueReason {
    Forced,
    Missing,
    LoadFailed,
    Expired,
    RenewalWindow,
    Undetermined,
}

impl fmt::Display for IssueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IssueReason::Forced => "forced",
            IssueReason::Missing => "missing",
            IssueReason::LoadFailed => "load-failed",
            IssueReason::Expired => "expired",
            IssueReason::RenewalWindow => "renewal-window",
            IssueReason::Undetermined => "undetermined-expiry",
        };
        f.write_str(reason)
    }
}

/// Keys and names shared by both outcomes of one run.
#[derive(Debug)]
struct Prepared {
    names: NormalizedSans,
    account_key: DerivedKey,
    tls_key: DerivedKey,
}

/// Decision engine over the remote store, the local files and the CA.
///
/// Not meant for concurrent calls on the same domain.
pub struct CertificateManager {
    remote: Arc<dyn RemoteStore>,
    writer: Arc<dyn LocalWriter>,
    authority: Arc<dyn CertificateAuthority>,
    clock: Clock,
}

impl fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateManager").finish_non_exhaustive()
    }
}

impl CertificateManager {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        writer: Arc<dyn LocalWriter>,
        authority: Arc<dyn CertificateAuthority>,
        clock: Clock,
    ) -> Self {
        Self {
            remote,
            writer,
            authority,
            clock,
        }
    }

    /// Make sure `config.out_dir` holds a valid certificate and key for
    /// `config.domain`, issuing one if needed.
    pub async fn ensure_certificate(&self, config: &Config) -> Result<Bundle, LifecycleError> {
        let prepared = prepare(config)?;
        let domain = prepared.names.primary().to_string();

        if config.force_issue {
            return self.issue(config, &prepared, IssueReason::Forced).await;
        }

        let loaded = with_timeout("remote load", config.timeout, self.remote.load(&domain)).await;
        let remote = match loaded {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                info!(domain = %domain, "No certificate in remote store");
                return self.issue(config, &prepared, IssueReason::Missing).await;
            }
            Err(e) => {
                warn!(domain = %domain, error = %e, "Remote load failed, issuing a new certificate");
                return self.issue(config, &prepared, IssueReason::LoadFailed).await;
            }
        };

        let expiry = remote
            .metadata
            .expires_at
            .or_else(|| leaf_certificate_expiry(remote.chain_pem.as_bytes()));
        let now = (self.clock)();
        let decision = evaluate_renewal(now, expiry, config.renewal_window);

        debug!(
            domain = %domain,
            now = %now,
            expires = ?expiry,
            decision = ?decision,
            "Evaluated remote certificate"
        );

        match (decision, expiry) {
            (RenewalDecision::Fresh, Some(expiry)) => {
                self.install(config, &prepared, &remote.chain_pem, expiry)
            }
            (RenewalDecision::Expired, _) => {
                self.issue(config, &prepared, IssueReason::Expired).await
            }
            (RenewalDecision::RenewalWindow, _) => {
                self.issue(config, &prepared, IssueReason::RenewalWindow).await
            }
            _ => self.issue(config, &prepared, IssueReason::Undetermined).await,
        }
    }

    /// Install a verified remote chain with the derived key.
    fn install(
        &self,
        config: &Config,
        prepared: &Prepared,
        chain_pem: &str,
        not_after: DateTime<Utc>,
    ) -> Result<Bundle, LifecycleError> {
        let domain = prepared.names.primary();
        verify_key(domain, chain_pem, &prepared.tls_key)?;

        let full_chain_path = self.writer.write_chain(&config.out_dir, chain_pem)?;
        let priv_key_path = self.writer.write_key(&config.out_dir, &prepared.tls_key)?;

        info!(
            domain = %domain,
            expires = %not_after,
            "Installed certificate from remote store"
        );

        Ok(Bundle {
            full_chain_path,
            priv_key_path,
            not_after,
            issued: false,
            reconstructed: true,
            primary: domain.to_string(),
            sans: prepared.names.sans().to_vec(),
        })
    }

    /// Obtain a certificate from the CA, install it, and push it to the
    /// remote store.
    async fn issue(
        &self,
        config: &Config,
        prepared: &Prepared,
        reason: IssueReason,
    ) -> Result<Bundle, LifecycleError> {
        let domain = prepared.names.primary();
        info!(
            domain = %domain,
            reason = %reason,
            challenge = %config.challenge,
            directory = %config.ca_dir,
            "Issuing certificate"
        );

        let request = IssueRequest {
            names: &prepared.names,
            account_key: &prepared.account_key,
            tls_key: &prepared.tls_key,
            email: &config.email,
            directory_url: &config.ca_dir,
            challenge: config.challenge,
            http_port: config.http_port,
            tls_port: config.tls_port,
            timeout: config.timeout,
        };
        let chain_pem = self.authority.issue(request).await?;

        let not_after = leaf_certificate_expiry(chain_pem.as_bytes()).ok_or_else(|| {
            AcmeError::Finalize("issued chain has no parsable certificate".to_string())
        })?;
        verify_key(domain, &chain_pem, &prepared.tls_key)?;

        let full_chain_path = self.writer.write_chain(&config.out_dir, &chain_pem)?;
        let priv_key_path = self.writer.write_key(&config.out_dir, &prepared.tls_key)?;

        // Local files are already correct; a later run retries the upload
        match with_timeout("remote store", config.timeout, self.remote.store(domain, &chain_pem)).await {
            Ok(()) => debug!(domain = %domain, "Pushed certificate to remote store"),
            Err(e) => warn!(
                domain = %domain,
                error = %e,
                "Failed to store certificate remotely, continuing with local files"
            ),
        }

        info!(
            domain = %domain,
            expires = %not_after,
            reason = %reason,
            "Issued certificate"
        );

        Ok(Bundle {
            full_chain_path,
            priv_key_path,
            not_after,
            issued: true,
            reconstructed: false,
            primary: domain.to_string(),
            sans: prepared.names.sans().to_vec(),
        })
    }
}

/// Validate `config`, normalize its names and derive both keys.
fn prepare(config: &Config) -> Result<Prepared, LifecycleError> {
    for warning in config.validate()? {
        warn!(warning = %warning, "Configuration warning");
    }

    let names = normalize_sans(&config.domain, &config.alt_names)?;
    let seed = seed_from_mnemonic(&config.mnemonic)?;
    let account_key = derive_account_key(&seed)?;
    let tls_key = derive_tls_key(&seed, names.primary(), config.version)?;

    debug!(
        domain = %names.primary(),
        sans = ?names.sans(),
        version = config.version,
        tls_key = %tls_key.fingerprint(),
        "Derived keys"
    );

    Ok(Prepared {
        names,
        account_key,
        tls_key,
    })
}

fn verify_key(domain: &str, chain_pem: &str, tls_key: &DerivedKey) -> Result<(), LifecycleError> {
    if leaf_pub_matches(chain_pem.as_bytes(), &tls_key.public_key()) {
        return Ok(());
    }
    warn!(
        domain = %domain,
        expected = %tls_key.fingerprint(),
        "Certificate public key does not match the derived TLS key"
    );
    Err(LifecycleError::KeyMismatch {
        domain: domain.to_string(),
    })
}

async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, LifecycleError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(LifecycleError::from),
        Err(_) => Err(LifecycleError::Timeout { operation, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DAY: Duration = Duration::from_secs(86_400);

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_unknown_expiry_is_undetermined() {
        assert_eq!(
            evaluate_renewal(at(1), None, DAY),
            RenewalDecision::Undetermined
        );
    }

    #[test]
    fn test_renewal_window_boundary() {
        let expiry = at(31);
        let window = 10 * DAY;
        let threshold = at(21);

        assert_eq!(
            evaluate_renewal(threshold - TimeDelta::seconds(1), Some(expiry), window),
            RenewalDecision::Fresh
        );
        // now == T - W does not trigger issuance
        assert_eq!(
            evaluate_renewal(threshold, Some(expiry), window),
            RenewalDecision::Fresh
        );
        assert_eq!(
            evaluate_renewal(threshold + TimeDelta::seconds(1), Some(expiry), window),
            RenewalDecision::RenewalWindow
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let expiry = at(31);

        assert_eq!(
            evaluate_renewal(expiry, Some(expiry), Duration::ZERO),
            RenewalDecision::Fresh
        );
        assert_eq!(
            evaluate_renewal(expiry, Some(expiry), DAY),
            RenewalDecision::RenewalWindow
        );
        assert_eq!(
            evaluate_renewal(expiry + TimeDelta::seconds(1), Some(expiry), DAY),
            RenewalDecision::Expired
        );
    }

    #[test]
    fn test_huge_window_always_renews() {
        assert_eq!(
            evaluate_renewal(at(1), Some(at(31)), Duration::MAX),
            RenewalDecision::RenewalWindow
        );
    }

    #[test]
    fn test_needs_issuance() {
        assert!(!RenewalDecision::Fresh.needs_issuance());
        assert!(RenewalDecision::Expired.needs_issuance());
        assert!(RenewalDecision::RenewalWindow.needs_issuance());
        assert!(RenewalDecision::Undetermined.needs_issuance());
    }

    #[test]
    fn test_issue_reason_display() {
        assert_eq!(IssueReason::RenewalWindow.to_string(), "renewal-window");
        assert_eq!(IssueReason::LoadFailed.to_string(), "load-failed");
    }

    #[test]
    fn test_prepare_rejects_missing_fields() {
        let err = prepare(&Config::new("", "example.com")).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
    }

    #[test]
    fn test_prepared_debug_hides_keys() {
        let config = Config::new(
            "abandon abandon abandon abandon abandon abandon \
             abandon abandon abandon abandon abandon about",
            "example.com",
        );
        let prepared = prepare(&config).unwrap();

        let rendered = format!("{:?}", prepared);
        let scalar: String = prepared
            .tls_key
            .secret()
            .to_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        assert!(rendered.contains("example.com"));
        assert!(rendered.contains(&prepared.tls_key.fingerprint()));
        assert!(!rendered.contains(&scalar));
    }
}
