//! HTTP remote certificate store
//!
//! Talks to a small JSON API keyed by primary domain:
//!
//! - `GET  {api_url}/certificates/{domain}` answers `200` with
//!   `{"certificate": "<pem>", "issued_at": "<rfc3339>", "expires_at": "<rfc3339>"}`
//!   or `404` when nothing is stored
//! - `POST {api_url}/certificates/{domain}` with `{"certificate": "<pem>"}`
//!
//! Requests carry a bearer token from a [`TokenSource`] when one yields a
//! token. Timestamps that are missing, unparsable, or not after the Unix
//! epoch are treated as absent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{CertificateMetadata, RemoteCertificate, RemoteStore, StorageError};

/// Provider of bearer tokens for the remote store.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Mint a token for `audience`. `Ok(None)` sends the request without
    /// an `Authorization` header.
    async fn token(&self, audience: Option<&str>) -> Result<Option<String>, StorageError>;
}

/// A fixed token, or none.
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.as_ref().map(|_| "<redacted>");
        f.debug_tuple("StaticToken").field(&shown).finish()
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self, _audience: Option<&str>) -> Result<Option<String>, StorageError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct LoadResponse {
    certificate: String,
    #[serde(default)]
    issued_at: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct StoreRequest<'a> {
    certificate: &'a str,
}

/// [`RemoteStore`] backed by the certificate API.
#[derive(Clone)]
pub struct HttpCertificateStore {
    http: HttpClient,
    base_url: Url,
    audience: Option<String>,
    tokens: Arc<dyn TokenSource>,
}

impl fmt::Debug for HttpCertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCertificateStore")
            .field("base_url", &self.base_url.as_str())
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl HttpCertificateStore {
    /// Create a store rooted at `api_url`.
    ///
    /// Every request is bounded by `timeout` and identifies itself with
    /// `user_agent`.
    pub fn new(
        api_url: &str,
        audience: Option<String>,
        tokens: Arc<dyn TokenSource>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let base_url = Url::parse(api_url).map_err(|e| StorageError::InvalidUrl(format!("{}: {}", api_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::InvalidUrl(api_url.to_string()));
        }

        let http = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            audience,
            tokens,
        })
    }

    /// URL of the certificate resource for `domain`
    fn certificate_url(&self, domain: &str) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("certificates")
            .push(domain);
        Ok(url)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, StorageError> {
        match self.tokens.token(self.audience.as_deref()).await? {
            Some(token) => Ok(request.bearer_auth(token)),
            None => {
                trace!("No token available, sending unauthenticated request");
                Ok(request)
            }
        }
    }
}

#[async_trait]
impl RemoteStore for HttpCertificateStore {
    async fn load(&self, domain: &str) -> Result<Option<RemoteCertificate>, StorageError> {
        let url = self.certificate_url(domain)?;
        debug!(domain = %domain, url = %url, "Loading certificate from remote store");

        let request = self.authorize(self.http.get(url)).await?;
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(domain = %domain, "No certificate in remote store");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let body: LoadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;

        if body.certificate.trim().is_empty() {
            return Err(StorageError::InvalidResponse(
                "response carries an empty certificate".to_string(),
            ));
        }

        let metadata = CertificateMetadata {
            issued_at: parse_timestamp(body.issued_at.as_deref()),
            expires_at: parse_timestamp(body.expires_at.as_deref()),
        };

        debug!(
            domain = %domain,
            expires_at = ?metadata.expires_at,
            "Loaded certificate from remote store"
        );

        Ok(Some(RemoteCertificate {
            chain_pem: body.certificate,
            metadata,
        }))
    }

    async fn store(&self, domain: &str, chain_pem: &str) -> Result<(), StorageError> {
        let url = self.certificate_url(domain)?;
        debug!(domain = %domain, url = %url, "Storing certificate in remote store");

        let request = self
            .authorize(self.http.post(url))
            .await?
            .json(&StoreRequest {
                certificate: chain_pem,
            });
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        info!(domain = %domain, "Stored certificate in remote store");
        Ok(())
    }
}

fn status_error(status: StatusCode, body: String) -> StorageError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return StorageError::Unauthorized(status.as_u16());
    }
    StorageError::Status {
        status: status.as_u16(),
        body,
    }
}

/// RFC 3339 timestamp strictly after the Unix epoch, else `None`
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => {
            let ts = ts.with_timezone(&Utc);
            (ts > DateTime::UNIX_EPOCH).then_some(ts)
        }
        Err(e) => {
            warn!(value = %raw, error = %e, "Ignoring unparsable timestamp from remote store");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHAIN: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn store_for(server: &MockServer, token: Option<&str>) -> HttpCertificateStore {
        HttpCertificateStore::new(
            &format!("{}/api/", server.uri()),
            Some("certs".to_string()),
            Arc::new(StaticToken::new(token.map(str::to_string))),
            "seedcert-test/1.0",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/certificates/example.com"))
            .and(header("authorization", "Bearer secret"))
            .and(header("user-agent", "seedcert-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "certificate": CHAIN,
                "issued_at": "2025-01-01T00:00:00Z",
                "expires_at": "2025-04-01T00:00:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cert = store_for(&server, Some("secret"))
            .load("example.com")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(cert.chain_pem, CHAIN);
        assert_eq!(
            cert.metadata.expires_at.unwrap().to_rfc3339(),
            "2025-04-01T00:00:00+00:00"
        );
        assert!(cert.metadata.issued_at.is_some());
    }

    #[tokio::test]
    async fn test_load_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/certificates/example.com"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let loaded = store_for(&server, None).load("example.com").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_epoch_timestamps_are_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "certificate": CHAIN,
                "issued_at": "1970-01-01T00:00:00Z",
                "expires_at": "not a date",
            })))
            .mount(&server)
            .await;

        let cert = store_for(&server, None)
            .load("example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cert.metadata, CertificateMetadata::default());
    }

    #[tokio::test]
    async fn test_load_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = store_for(&server, None).load("example.com").await.unwrap_err();
        assert!(matches!(err, StorageError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_load_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = store_for(&server, Some("wrong")).load("example.com").await.unwrap_err();
        assert!(matches!(err, StorageError::Unauthorized(401)));
    }

    #[tokio::test]
    async fn test_load_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let err = store_for(&server, None).load("example.com").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_store_posts_certificate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/certificates/example.com"))
            .and(body_json(serde_json::json!({ "certificate": CHAIN })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server, Some("secret"))
            .store("example.com", CHAIN)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = store_for(&server, None)
            .store("example.com", CHAIN)
            .await
            .unwrap_err();
        match err {
            StorageError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpCertificateStore::new(
            "not a url",
            None,
            Arc::new(StaticToken::default()),
            "ua",
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl(_)));
    }

    #[test]
    fn test_static_token_debug_redacts() {
        let token = StaticToken::new(Some("hunter2".to_string()));
        assert!(!format!("{:?}", token).contains("hunter2"));
        assert!(StaticToken::new(Some("  ".to_string())).0.is_none());
    }
}
