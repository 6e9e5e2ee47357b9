//! rustls server configuration for mandatory client authentication.

use std::str::FromStr;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{ServerConfig, SupportedProtocolVersion};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::store::{ServerIdentity, TrustStore};
use crate::{Error, Result};

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Lowest TLS version the listener negotiates.
///
/// Written as `"1.2"` or `"1.3"`; an unquoted YAML or environment value
/// (`1.2`) is accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TlsVersion {
    /// TLS 1.2 and 1.3.
    #[serde(rename = "1.2")]
    Tls12,
    /// TLS 1.3 only.
    #[default]
    #[serde(rename = "1.3")]
    Tls13,
}

impl TlsVersion {
    /// Protocol versions enabled for this floor.
    #[must_use]
    pub fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            Self::Tls12 => rustls::ALL_VERSIONS,
            Self::Tls13 => TLS13_ONLY,
        }
    }
}

impl FromStr for TlsVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "1.2" | "TLSv1.2" => Ok(Self::Tls12),
            "1.3" | "TLSv1.3" => Ok(Self::Tls13),
            other => Err(format!(
                "unsupported TLS version '{other}', expected \"1.2\" or \"1.3\""
            )),
        }
    }
}

impl<'de> Deserialize<'de> for TlsVersion {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Number(n) => format!("{n:.1}"),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The crypto provider used for every TLS object this crate builds.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Build a `rustls::ServerConfig` that presents `identity` and requires every
/// client to present a certificate chaining to `trust`.
///
/// Client authentication is not optional: the verifier is built without
/// `allow_unauthenticated`, so rustls aborts the handshake of any client that
/// sends no certificate or one that fails validation.
///
/// # Errors
///
/// Returns an error if the verifier or the server config cannot be built.
pub fn build_server_config(
    trust: &TrustStore,
    identity: &ServerIdentity,
    min_version: TlsVersion,
) -> Result<ServerConfig> {
    let provider = crypto_provider();

    let verifier = WebPkiClientVerifier::builder_with_provider(trust.roots(), Arc::clone(&provider))
        .build()
        .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(min_version.protocol_versions())?
        .with_client_cert_verifier(verifier)
        .with_single_cert(identity.chain().to_vec(), identity.key().clone_key())?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server = identity.summary().display_name(),
        ca_certificates = trust.ca_certificates().len(),
        min_version = ?min_version,
        "mTLS server config built"
    );

    Ok(tls_cfg)
}
