//! TLS-ALPN-01 challenge responder
//!
//! For each pending name the CA connects with SNI set to the name and ALPN
//! set to `acme-tls/1`, and expects a self-signed certificate carrying the
//! key authorization digest in the `acmeIdentifier` extension. No
//! application data is exchanged.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

use super::AcmeError;

/// ALPN protocol identifier of TLS-ALPN-01
pub const ACME_TLS_ALPN_PROTOCOL: &[u8] = b"acme-tls/1";

/// Certificate resolver holding one challenge certificate per name.
#[derive(Debug, Clone, Default)]
pub struct AlpnCertResolver {
    certs: Arc<DashMap<String, Arc<CertifiedKey>>>,
}

impl AlpnCertResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a challenge certificate for `domain` built from the SHA-256
    /// digest of the key authorization.
    pub fn add(&self, domain: &str, key_authorization_digest: &[u8]) -> Result<(), AcmeError> {
        let certified = challenge_certificate(domain, key_authorization_digest)?;
        debug!(domain = %domain, "Registering ACME TLS-ALPN-01 challenge");
        self.certs
            .insert(domain.to_ascii_lowercase(), Arc::new(certified));
        Ok(())
    }

    pub fn remove(&self, domain: &str) {
        if self.certs.remove(&domain.to_ascii_lowercase()).is_some() {
            debug!(domain = %domain, "Removed ACME TLS-ALPN-01 challenge");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.certs.len()
    }

    fn lookup(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        self.certs
            .get(&server_name.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl ResolvesServerCert for AlpnCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let offers_acme = client_hello
            .alpn()
            .map(|mut protocols| protocols.any(|p| p == ACME_TLS_ALPN_PROTOCOL))
            .unwrap_or(false);
        if !offers_acme {
            trace!("Rejecting TLS handshake without acme-tls/1");
            return None;
        }

        let server_name = client_hello.server_name()?;
        let found = self.lookup(server_name);
        trace!(server_name = %server_name, found = found.is_some(), "TLS-ALPN-01 lookup");
        found
    }
}

/// Self-signed certificate for `domain` with the `acmeIdentifier` extension.
fn challenge_certificate(domain: &str, digest: &[u8]) -> Result<CertifiedKey, AcmeError> {
    let key_pair = KeyPair::generate()?;
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(digest)];
    let cert = params.self_signed(&key_pair)?;

    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key_der)
        .map_err(|e| AcmeError::Tls(e.to_string()))?;

    Ok(CertifiedKey::new(vec![cert.der().clone()], signing_key))
}

/// Running TLS-ALPN-01 responder. Stops when dropped.
#[derive(Debug)]
pub struct TlsAlpnResponder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TlsAlpnResponder {
    /// Bind `addr` and complete `acme-tls/1` handshakes with certificates
    /// from `resolver`.
    pub async fn bind(addr: SocketAddr, resolver: AlpnCertResolver) -> Result<Self, AcmeError> {
        let mut config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| AcmeError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
        config.alpn_protocols = vec![ACME_TLS_ALPN_PROTOCOL.to_vec()];

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

        info!(addr = %local_addr, "TLS-ALPN-01 responder listening");
        let task = tokio::spawn(serve(listener, TlsAcceptor::from(Arc::new(config))));

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TlsAlpnResponder {
    fn drop(&mut self) {
        self.task.abort();
        debug!(addr = %self.local_addr, "TLS-ALPN-01 responder stopped");
    }
}

async fn serve(listener: TcpListener, acceptor: TlsAcceptor) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Failed to accept TLS-ALPN-01 connection");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(_) => trace!(peer = %peer, "TLS-ALPN-01 handshake completed"),
                Err(e) => debug!(peer = %peer, error = %e, "TLS-ALPN-01 handshake failed"),
            }
        });
    }
}
