//! ACME client built on `instant-acme`

use std::future::Future;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, Key, NewOrder, OrderStatus,
    RetryPolicy,
};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use seedcert_common::{DerivedKey, NormalizedSans};
use seedcert_config::ChallengeKind;
use tracing::{debug, info, warn};

use super::alpn::{AlpnCertResolver, TlsAlpnResponder};
use super::challenge::{Http01Challenges, Http01Responder};
use super::{AcmeError, CertificateAuthority, IssueRequest};

/// [`CertificateAuthority`] talking to a real ACME server.
///
/// Holds no state between calls: the account is looked up from the derived
/// account key on every issuance.
#[derive(Debug, Clone)]
pub struct AcmeAuthority {
    /// Address the challenge responders bind to; the port comes from the
    /// request
    bind_ip: IpAddr,
}

impl Default for AcmeAuthority {
    fn default() -> Self {
        Self {
            bind_ip: Ipv6Addr::UNSPECIFIED.into(),
        }
    }
}

impl AcmeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the challenge responders to `ip` instead of all interfaces
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Register the account for `account_key`, or look it up when the CA
    /// already knows the key, then publish the contact email.
    async fn account(&self, request: &IssueRequest<'_>) -> Result<Account, AcmeError> {
        let key_der = request.account_key.to_pkcs8_der()?;
        let url = request.directory_url;

        let account = register_or_lookup(
            request.timeout,
            register(&key_der, url, Registration::Create),
            || register(&key_der, url, Registration::Existing),
        )
        .await?;

        info!(
            directory = %url,
            account_key = %request.account_key.fingerprint(),
            "ACME account ready"
        );

        let email = request.email.trim();
        if !email.is_empty() {
            let contact = format!("mailto:{}", email);
            let contacts = [contact.as_str()];
            let updated = step(
                "update_contacts",
                request.timeout,
                account.update_contacts(&contacts),
                AcmeError::Account,
            )
            .await;
            if let Err(e) = updated {
                warn!(error = %e, email = %email, "Failed to set ACME account contact");
            }
        }

        Ok(account)
    }

    /// Answer every pending authorization, registering challenge material
    /// with the running responder.
    async fn authorize(
        &self,
        order: &mut instant_acme::Order,
        request: &IssueRequest<'_>,
        responder: &Responder,
    ) -> Result<Vec<String>, AcmeError> {
        let mut registered = Vec::new();
        let mut authorizations = order.authorizations();

        while let Some(next) = step_result("authorizations", request.timeout, authorizations.next()).await? {
            let mut authz = next.map_err(|e| AcmeError::Order(e.to_string()))?;

            let domain = match authz.identifier().identifier {
                Identifier::Dns(name) => name.clone(),
                other => {
                    return Err(AcmeError::Order(format!(
                        "unsupported identifier in authorization: {:?}",
                        other
                    )))
                }
            };

            match &authz.status {
                AuthorizationStatus::Valid => {
                    debug!(domain = %domain, "Authorization already valid");
                    continue;
                }
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(AcmeError::Challenge {
                        domain,
                        message: format!("authorization is {:?}", status),
                    })
                }
            }

            let challenge_type = match request.challenge {
                ChallengeKind::Http01 => ChallengeType::Http01,
                ChallengeKind::TlsAlpn01 => ChallengeType::TlsAlpn01,
            };

            let mut challenge = authz.challenge(challenge_type).ok_or_else(|| AcmeError::NoChallenge {
                domain: domain.clone(),
                challenge: request.challenge.as_str(),
            })?;

            let key_authorization = challenge.key_authorization();
            match responder {
                Responder::Http(challenges, _) => {
                    challenges.add(&challenge.token, key_authorization.as_str());
                    registered.push(challenge.token.clone());
                }
                Responder::TlsAlpn(resolver, _) => {
                    resolver.add(&domain, key_authorization.digest().as_ref())?;
                    registered.push(domain.clone());
                }
            }

            step("set_ready", request.timeout, challenge.set_ready(), AcmeError::Order).await?;
            info!(domain = %domain, challenge = %request.challenge, "Challenge ready");
        }

        Ok(registered)
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn issue(&self, request: IssueRequest<'_>) -> Result<String, AcmeError> {
        let names = request.names;
        info!(
            domain = %names.primary(),
            sans = ?names.sans(),
            directory = %request.directory_url,
            challenge = %request.challenge,
            "Requesting certificate"
        );

        let account = self.account(&request).await?;

        let identifiers: Vec<Identifier> = names
            .sans()
            .iter()
            .map(|name| Identifier::Dns(name.clone()))
            .collect();
        let mut order = step(
            "new_order",
            request.timeout,
            account.new_order(&NewOrder::new(&identifiers)),
            AcmeError::Order,
        )
        .await?;

        // The responder stops when dropped, on every exit path
        let responder = Responder::start(self.bind_ip, &request).await?;
        let registered = self.authorize(&mut order, &request, &responder).await?;
        let status = step(
            "poll_ready",
            request.timeout,
            order.poll_ready(&RetryPolicy::default()),
            AcmeError::Order,
        )
        .await;
        responder.cleanup(&registered);
        drop(responder);

        let status = status?;
        if status != OrderStatus::Ready {
            return Err(AcmeError::Order(format!(
                "order for '{}' is {:?} after validation",
                names.primary(),
                status
            )));
        }

        let csr = certificate_request(names, request.tls_key)?;
        step(
            "finalize",
            request.timeout,
            order.finalize_csr(&csr),
            AcmeError::Finalize,
        )
        .await?;

        let chain = step(
            "poll_certificate",
            request.timeout,
            order.poll_certificate(&RetryPolicy::default()),
            AcmeError::Finalize,
        )
        .await?;

        info!(domain = %names.primary(), "Certificate issued");
        Ok(chain)
    }
}

/// Challenge state plus the listener serving it.
enum Responder {
    Http(Http01Challenges, Http01Responder),
    TlsAlpn(AlpnCertResolver, TlsAlpnResponder),
}

impl Responder {
    async fn start(ip: IpAddr, request: &IssueRequest<'_>) -> Result<Self, AcmeError> {
        match request.challenge {
            ChallengeKind::Http01 => {
                let challenges = Http01Challenges::new();
                let addr = SocketAddr::new(ip, request.http_port);
                let listener = Http01Responder::bind(addr, challenges.clone()).await?;
                Ok(Responder::Http(challenges, listener))
            }
            ChallengeKind::TlsAlpn01 => {
                let resolver = AlpnCertResolver::new();
                let addr = SocketAddr::new(ip, request.tls_port);
                let listener = TlsAlpnResponder::bind(addr, resolver.clone()).await?;
                Ok(Responder::TlsAlpn(resolver, listener))
            }
        }
    }

    fn cleanup(&self, registered: &[String]) {
        for entry in registered {
            match self {
                Responder::Http(challenges, _) => challenges.remove(entry),
                Responder::TlsAlpn(resolver, _) => resolver.remove(entry),
            }
        }
    }
}

/// How [`register`] addresses the account endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    /// Create the account, or return it if the key is already registered
    Create,
    /// Only return an account that already exists for the key
    Existing,
}

/// Create or look up the account bound to the PKCS#8 key `pkcs8_der`.
async fn register(
    pkcs8_der: &[u8],
    directory_url: &str,
    mode: Registration,
) -> Result<Account, instant_acme::Error> {
    let signing_key = Key::from_pkcs8_der(PrivatePkcs8KeyDer::from(pkcs8_der))?;
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8_der.to_vec()));
    let builder = Account::builder()?;

    let (account, _credentials) = match mode {
        Registration::Create => {
            builder
                .create_from_key((signing_key, key_der), directory_url.to_string())
                .await?
        }
        Registration::Existing => {
            builder
                .from_key((signing_key, key_der), directory_url.to_string())
                .await?
        }
    };
    Ok(account)
}

/// Run `create`; when the CA rejects it, resolve the existing account with
/// `lookup` instead. A timeout is final and skips the lookup.
async fn register_or_lookup<T, C, L, LF>(
    timeout: Duration,
    create: C,
    lookup: L,
) -> Result<T, AcmeError>
where
    C: Future<Output = Result<T, instant_acme::Error>>,
    L: FnOnce() -> LF,
    LF: Future<Output = Result<T, instant_acme::Error>>,
{
    match step("new_account", timeout, create, AcmeError::Account).await {
        Ok(account) => Ok(account),
        Err(e @ AcmeError::Timeout { .. }) => Err(e),
        Err(e) => {
            warn!(error = %e, "ACME registration failed, looking up existing account");
            step("lookup_account", timeout, lookup(), AcmeError::Account).await
        }
    }
}

/// DER CSR for `names`, signed by the TLS key.
fn certificate_request(names: &NormalizedSans, tls_key: &DerivedKey) -> Result<Vec<u8>, AcmeError> {
    let key_pair = KeyPair::from_pem(&tls_key.to_pkcs8_pem()?)?;

    let mut params = CertificateParams::new(names.sans().to_vec())?;
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, names.primary());
    params.distinguished_name = distinguished_name;

    let csr = params.serialize_request(&key_pair)?;
    Ok(csr.der().to_vec())
}

/// Run one ACME step under `timeout`, mapping protocol errors with `err`.
async fn step<T, F>(
    name: &'static str,
    timeout: Duration,
    fut: F,
    err: fn(String) -> AcmeError,
) -> Result<T, AcmeError>
where
    F: Future<Output = Result<T, instant_acme::Error>>,
{
    step_result(name, timeout, fut).await?.map_err(|e| {
        debug!(step = name, error = %e, "ACME step failed");
        err(e.to_string())
    })
}

/// Like [`step`] but leaves the inner result to the caller.
async fn step_result<T, F>(name: &'static str, timeout: Duration, fut: F) -> Result<T, AcmeError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| AcmeError::Timeout {
            step: name,
            after: timeout,
        })
}
