//! Trust store and server identity loading.
//!
//! [`load`] is the only way to obtain a [`TrustStore`] / [`ServerIdentity`]
//! pair.  Both are immutable afterwards and are shared read-only (behind
//! `Arc`) by every connection task.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use tracing::{debug, info, warn};

use super::LoadError;
use super::pem::{load_certs, load_private_key};
use super::tls::crypto_provider;
use crate::certificate::{CertificateSummary, parse_der};

/// Locations of the three files required to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    /// PEM bundle with one or more CA certificates.
    pub ca_bundle: PathBuf,
    /// PEM server certificate (leaf first, optional intermediates after).
    pub server_cert: PathBuf,
    /// PEM server private key.
    pub server_key: PathBuf,
}

impl CertificatePaths {
    fn required(&self) -> [&Path; 3] {
        [
            self.ca_bundle.as_path(),
            self.server_cert.as_path(),
            self.server_key.as_path(),
        ]
    }
}

/// A parsed CA certificate.
#[derive(Debug, Clone)]
pub struct CaCertificate {
    der: CertificateDer<'static>,
    summary: CertificateSummary,
}

impl CaCertificate {
    /// DER encoding.
    #[must_use]
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// Decoded subject/issuer/validity fields.
    #[must_use]
    pub fn summary(&self) -> &CertificateSummary {
        &self.summary
    }
}

/// The CA trust anchors client certificates must chain to.
///
/// Never empty.
#[derive(Debug, Clone)]
pub struct TrustStore {
    ca_certificates: Vec<CaCertificate>,
    roots: Arc<RootCertStore>,
}

impl TrustStore {
    /// The configured CA certificates.
    #[must_use]
    pub fn ca_certificates(&self) -> &[CaCertificate] {
        &self.ca_certificates
    }

    /// The anchors as a rustls root store, for the client verifier.
    #[must_use]
    pub fn roots(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    fn is_known_issuer(&self, cert: &CertificateSummary) -> bool {
        self.ca_certificates
            .iter()
            .any(|ca| ca.summary.subject == cert.issuer)
    }
}

/// This server's certificate chain and private key.
pub struct ServerIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    summary: CertificateSummary,
}

impl ServerIdentity {
    /// Certificate chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Private key matching the leaf certificate.
    #[must_use]
    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// Decoded fields of the leaf certificate.
    #[must_use]
    pub fn summary(&self) -> &CertificateSummary {
        &self.summary
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("subject", &self.summary.subject)
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Load the trust store and server identity.
///
/// Presence of all three files is checked before any of them is parsed, so a
/// missing file is always reported as [`LoadError::MissingFile`] with its
/// path.
///
/// # Errors
///
/// See [`LoadError`].  Any error is fatal at startup.
pub fn load(paths: &CertificatePaths) -> Result<(TrustStore, ServerIdentity), LoadError> {
    for path in paths.required() {
        if !path.exists() {
            return Err(LoadError::MissingFile(path.to_path_buf()));
        }
    }

    let trust = load_trust_store(&paths.ca_bundle)?;
    let identity = load_server_identity(&paths.server_cert, &paths.server_key)?;

    if !trust.is_known_issuer(&identity.summary) {
        warn!(
            server_cert = %paths.server_cert.display(),
            issuer = ?identity.summary.issuer,
            "Server certificate issuer matches no configured CA"
        );
    }

    info!(
        ca_certificates = trust.ca_certificates.len(),
        server = identity.summary.display_name(),
        "Trust material loaded"
    );

    Ok((trust, identity))
}

fn load_trust_store(path: &Path) -> Result<TrustStore, LoadError> {
    let ders = load_certs(path)?;

    let mut roots = RootCertStore::empty();
    let mut ca_certificates = Vec::with_capacity(ders.len());
    for der in ders {
        let summary = summarize(path, &der)?;
        roots
            .add(der.clone())
            .map_err(|e| LoadError::parse(path, format!("unusable trust anchor: {e}")))?;
        debug!(ca = summary.display_name(), "Added CA trust anchor");
        ca_certificates.push(CaCertificate { der, summary });
    }

    Ok(TrustStore {
        ca_certificates,
        roots: Arc::new(roots),
    })
}

fn load_server_identity(cert_path: &Path, key_path: &Path) -> Result<ServerIdentity, LoadError> {
    let chain = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let summary = summarize(cert_path, &chain[0])?;

    check_key_pair(&chain, &key, cert_path, key_path)?;

    Ok(ServerIdentity {
        chain,
        key,
        summary,
    })
}

fn summarize(path: &Path, der: &CertificateDer<'_>) -> Result<CertificateSummary, LoadError> {
    parse_der(der)
        .and_then(|cert| CertificateSummary::from_x509(&cert))
        .map_err(|detail| LoadError::parse(path, detail))
}

/// Confirm the private key belongs to the leaf certificate.
fn check_key_pair(
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), LoadError> {
    let signing_key = crypto_provider()
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| LoadError::parse(key_path, format!("unsupported private key: {e}")))?;

    match CertifiedKey::new(chain.to_vec(), signing_key).keys_match() {
        Ok(()) => Ok(()),
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::KeyMismatch)) => {
            Err(LoadError::KeyMismatch {
                cert: cert_path.to_path_buf(),
                key: key_path.to_path_buf(),
            })
        }
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {
            debug!(key = %key_path.display(), "Key type cannot report its public key; pair not checked");
            Ok(())
        }
        Err(e) => Err(LoadError::parse(cert_path, e.to_string())),
    }
}
