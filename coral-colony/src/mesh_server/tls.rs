//! TLS termination for the mesh listener.
//!
//! The server presents a chain issued by the colony's server intermediate.
//! Client certificates are optional at handshake time (enrollment arrives
//! without one) and verified against the agent intermediate when offered.
//! The acceptor captures the verified peer certificate into a request
//! extension; revocation is checked per request against a generation-keyed
//! cache so a revoke takes effect without restarting the listener.

use crate::ca::ServerCertificate;
use crate::error::{Error, ErrorKind, Result};
use crate::store::ColonyDb;
use axum_server::{accept::Accept, tls_rustls::RustlsAcceptor, tls_rustls::RustlsConfig};
use futures_util::future::BoxFuture;
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use std::{
    collections::HashSet,
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower_http::add_extension::AddExtension;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// Install the process-wide rustls crypto provider. Idempotent.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// The verified identity of a connected peer, if it presented one.
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    /// Agent id from the SPIFFE SAN.
    pub agent_id: Option<String>,
    /// Lowercase hex certificate serial.
    pub serial: Option<String>,
    pub spiffe_id: Option<String>,
}

impl PeerIdentity {
    /// Parse agent id, serial and SPIFFE id out of the peer's leaf.
    fn from_peer_certificates(certificates: Option<&[CertificateDer<'_>]>) -> PeerIdentity {
        let Some(leaf) = certificates.and_then(|certs| certs.first()) else {
            return PeerIdentity::default();
        };

        let Ok((_, parsed)) = X509Certificate::from_der(leaf.as_ref()) else {
            return PeerIdentity::default();
        };

        let serial = Some(normalize_serial(
            &parsed.raw_serial_as_string().replace(':', ""),
        ));

        let spiffe_id = parsed
            .subject_alternative_name()
            .ok()
            .flatten()
            .and_then(|san| {
                san.value.general_names.iter().find_map(|name| match name {
                    GeneralName::URI(uri) if uri.starts_with("spiffe://") => {
                        Some(uri.to_string())
                    }
                    _ => None,
                })
            });

        let agent_id = spiffe_id
            .as_deref()
            .and_then(|id| id.rsplit_once("/agent/"))
            .map(|(_, agent_id)| agent_id.to_string());

        PeerIdentity {
            agent_id,
            serial,
            spiffe_id,
        }
    }
}

/// Serial comparison form: lowercase hex without leading zeros. DER
/// encodes serial integers minimally, so the raw certificate serial and
/// the stored 32-hex form can disagree on leading zero bytes.
pub(crate) fn normalize_serial(serial_hex: &str) -> String {
    let lower = serial_hex.to_lowercase();
    let trimmed = lower.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the mesh listener's rustls config.
pub fn mesh_server_config(
    server: &ServerCertificate,
    agent_intermediate_pem: &str,
    root_pem: &str,
) -> anyhow::Result<ServerConfig> {
    install_crypto_provider();

    let mut roots = RootCertStore::empty();
    for der in pem_to_ders(agent_intermediate_pem)? {
        roots.add(der)?;
    }
    // The root anchors re-issued intermediates after a rotation.
    for der in pem_to_ders(root_pem)? {
        roots.add(der)?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .allow_unauthenticated()
        .build()?;

    let mut chain: Vec<CertificateDer<'static>> = Vec::new();
    for pem in &server.chain_pems {
        chain.extend(pem_to_ders(pem)?);
    }
    let key = pem_to_key(&server.key_pem)?;

    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

fn pem_to_ders(pem: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let mut reader = io::BufReader::new(pem.as_bytes());
    let certs: std::result::Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    Ok(certs?)
}

fn pem_to_key(pem: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let mut reader = io::BufReader::new(pem.as_bytes());
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| anyhow::anyhow!("no private key in pem"))
}

/// Accepts TLS connections and exposes the peer identity as an extension.
#[derive(Clone)]
pub struct MeshAcceptor {
    inner: RustlsAcceptor,
}

impl MeshAcceptor {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(RustlsConfig::from_config(Arc::new(config))),
        }
    }
}

impl<I, S> Accept<I, S> for MeshAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, PeerIdentity>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let identity =
                PeerIdentity::from_peer_certificates(stream.get_ref().1.peer_certificates());
            Ok((stream, AddExtension::new(service, identity)))
        })
    }
}

/// Revoked-serial cache, reloaded when the issuer's revocation generation
/// moves.
#[derive(Clone)]
pub struct RevocationCache {
    db: ColonyDb,
    generation: Arc<AtomicU64>,
    cached: Arc<RwLock<(u64, HashSet<String>)>>,
}

impl RevocationCache {
    pub fn new(db: ColonyDb, generation: Arc<AtomicU64>) -> Self {
        Self {
            db,
            generation,
            // Start one generation behind so the first check loads.
            cached: Arc::new(RwLock::new((u64::MAX, HashSet::new()))),
        }
    }

    /// `Unauthorized` when `serial` has been revoked.
    pub async fn check(&self, serial: &str) -> Result<()> {
        let current = self.generation.load(Ordering::Acquire);

        let stale = {
            let cached = self.cached.read().expect("revocation cache poisoned");
            cached.0 != current
        };

        if stale {
            let serials: HashSet<String> = self
                .db
                .revoked_serials()
                .await?
                .iter()
                .map(|s| normalize_serial(s))
                .collect();
            let mut cached = self.cached.write().expect("revocation cache poisoned");
            *cached = (current, serials);
        }

        let cached = self.cached.read().expect("revocation cache poisoned");
        if cached.1.contains(&normalize_serial(serial)) {
            return Err(Error::with_cause(
                ErrorKind::Unauthorized,
                "client certificate is revoked",
            ));
        }
        Ok(())
    }
}
