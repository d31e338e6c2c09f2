//! HTTP-01 challenge responder
//!
//! Pending challenges live in [`Http01Challenges`], a token to key
//! authorization map. [`Http01Responder`] serves it at
//! `/.well-known/acme-challenge/<token>` for as long as the handle lives.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::AcmeError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Pending HTTP-01 challenges.
///
/// Clones share the same map, so the ACME client can register tokens while
/// the responder task reads them.
#[derive(Debug, Clone, Default)]
pub struct Http01Challenges {
    /// Map of challenge token -> key authorization response
    challenges: Arc<DashMap<String, String>>,
}

impl Http01Challenges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending challenge
    pub fn add(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Remove a completed challenge
    pub fn remove(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed ACME challenge");
        }
    }

    /// Key authorization for `token`, if registered
    pub fn get(&self, token: &str) -> Option<String> {
        let result = self.challenges.get(token).map(|v| v.clone());
        trace!(token = %token, found = result.is_some(), "ACME challenge lookup");
        result
    }

    /// Token part of a challenge request path
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty() && !token.contains('/'))
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    /// Build the response for a request to `path`
    pub fn respond(&self, path: &str) -> Response<Full<Bytes>> {
        let body = Self::extract_token(path).and_then(|token| self.get(token));

        let (status, body) = match body {
            Some(key_authorization) => (StatusCode::OK, Bytes::from(key_authorization)),
            None => (StatusCode::NOT_FOUND, Bytes::from_static(b"not found")),
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain"),
        );
        response
    }
}

/// Running HTTP-01 responder. Stops when dropped.
#[derive(Debug)]
pub struct Http01Responder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Http01Responder {
    /// Bind `addr` and serve `challenges` on a background task.
    pub async fn bind(addr: SocketAddr, challenges: Http01Challenges) -> Result<Self, AcmeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AcmeError::Responder {
                port: addr.port(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| AcmeError::Responder {
            port: addr.port(),
            source,
        })?;

        info!(addr = %local_addr, "HTTP-01 responder listening");
        let task = tokio::spawn(serve(listener, challenges));

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Http01Responder {
    fn drop(&mut self) {
        self.task.abort();
        debug!(addr = %self.local_addr, "HTTP-01 responder stopped");
    }
}

async fn serve(listener: TcpListener, challenges: Http01Challenges) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Failed to accept HTTP-01 connection");
                continue;
            }
        };

        let challenges = challenges.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                trace!(peer = %peer, path = %req.uri().path(), "HTTP-01 request");
                let response = challenges.respond(req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer, error = %e, "HTTP-01 connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_add_and_get_challenge() {
        let challenges = Http01Challenges::new();
        challenges.add("test-token", "test-key-auth");

        assert_eq!(challenges.get("test-token"), Some("test-key-auth".to_string()));
        assert_eq!(challenges.get("nonexistent"), None);
    }

    #[test]
    fn test_remove_challenge() {
        let challenges = Http01Challenges::new();
        challenges.add("test-token", "test-key-auth");
        assert_eq!(challenges.pending_count(), 1);

        challenges.remove("test-token");
        assert_eq!(challenges.pending_count(), 0);
        assert_eq!(challenges.get("test-token"), None);
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            Http01Challenges::extract_token("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(Http01Challenges::extract_token("/.well-known/acme-challenge/"), None);
        assert_eq!(Http01Challenges::extract_token("/.well-known/acme-challenge/a/b"), None);
        assert_eq!(Http01Challenges::extract_token("/other/path"), None);
    }

    #[test]
    fn test_clone_shares_state() {
        let first = Http01Challenges::new();
        let second = first.clone();

        first.add("token", "auth");
        assert_eq!(second.get("token"), Some("auth".to_string()));
    }

    #[tokio::test]
    async fn test_respond() {
        let challenges = Http01Challenges::new();
        challenges.add("tok", "tok.thumb");

        let found = challenges.respond("/.well-known/acme-challenge/tok");
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(body_of(found).await, "tok.thumb");

        let missing = challenges.respond("/.well-known/acme-challenge/other");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let elsewhere = challenges.respond("/index.html");
        assert_eq!(elsewhere.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_responder_serves_over_tcp() {
        let challenges = Http01Challenges::new();
        let responder = Http01Responder::bind("127.0.0.1:0".parse().unwrap(), challenges.clone())
            .await
            .unwrap();
        challenges.add("live-token", "live-token.thumb");

        let url = format!(
            "http://{}/.well-known/acme-challenge/live-token",
            responder.local_addr()
        );
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "live-token.thumb");

        let missing = reqwest::get(format!(
            "http://{}/.well-known/acme-challenge/unknown",
            responder.local_addr()
        ))
        .await
        .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = Http01Responder::bind("127.0.0.1:0".parse().unwrap(), Http01Challenges::new())
            .await
            .unwrap();

        let err = Http01Responder::bind(first.local_addr(), Http01Challenges::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AcmeError::Responder { .. }));
    }
}
