//! Client for exercising a running server
//!
//! Connects as a stored client identity, or with no certificate at all,
//! sends one GET and reports either the JSON response or the TLS refusal.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};
use serde_json::Value;
use tracing::debug;

use crate::config::{Config, ServerConfig};
use crate::store::validate_client_name;
use crate::trust::crypto_provider;
use crate::trust::pem::{load_certs, load_private_key};
use crate::{Error, Result};

/// Id that selects a connection without a client certificate.
pub const ANONYMOUS_ID: &str = "none";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Which certificate the client presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    /// `client<name>.crt` / `.key` from the certificate store.
    Stored(String),
    /// No certificate.
    Anonymous,
}

impl ClientIdentity {
    /// Parse a store id (`client1`, ...) or [`ANONYMOUS_ID`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for anything else, including `ca` and
    /// `server`.
    pub fn parse(id: &str) -> Result<Self> {
        if id == ANONYMOUS_ID {
            return Ok(Self::Anonymous);
        }
        validate_client_name(id)?;
        Ok(Self::Stored(id.to_owned()))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored(id) => f.write_str(id),
            Self::Anonymous => f.write_str(ANONYMOUS_ID),
        }
    }
}

/// What the server did with the request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutcome {
    /// The request was served.
    Response {
        /// HTTP status code.
        status: u16,
        /// Parsed JSON body, or the raw text if it was not JSON.
        body: Value,
    },
    /// The server refused the TLS session.
    Refused {
        /// The TLS error as seen by the client.
        detail: String,
    },
}

/// Client TLS configuration: the configured CA bundle as roots, plus the
/// stored identity's chain and key.
///
/// # Errors
///
/// Returns a load error if the CA bundle or the client's files are missing
/// or malformed, and `Error::Tls` if rustls refuses them.
pub fn tls_config(config: &Config, identity: &ClientIdentity) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for ca in load_certs(&config.trust.certificate_paths().ca_bundle)? {
        roots.add(ca)?;
    }

    let builder = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

    match identity {
        ClientIdentity::Anonymous => Ok(builder.with_no_client_auth()),
        ClientIdentity::Stored(id) => {
            let store = config.trust.store();
            let chain = load_certs(&store.resolve(id)?)?;
            let key = load_private_key(&store.key_for(id)?)?;
            Ok(builder.with_client_auth_cert(chain, key)?)
        }
    }
}

/// `https://` URL of the configured server.  Wildcard bind addresses are
/// reached through `localhost`.
#[must_use]
pub fn server_url(server: &ServerConfig, path: &str) -> String {
    let host = match server.host.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => "localhost".to_owned(),
        Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
        _ => server.host.clone(),
    };
    let path = if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    };
    format!("https://{host}:{}{path}", server.port)
}

/// Send `GET path` to the configured server as `identity`.
///
/// # Errors
///
/// Returns an error if the client's trust material cannot be loaded, or if
/// the request fails for a reason other than a TLS refusal (for example
/// nothing listening on the port).
pub async fn request(
    config: &Config,
    identity: &ClientIdentity,
    path: &str,
) -> Result<ClientOutcome> {
    let http = reqwest::Client::builder()
        .use_preconfigured_tls(tls_config(config, identity)?)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))?;

    let url = server_url(&config.server, path);
    debug!(%url, client = %identity, "Sending request");

    let failed = |e: reqwest::Error| match tls_refusal(&e) {
        Some(detail) => Ok(ClientOutcome::Refused { detail }),
        None => Err(Error::Transport(format!("Request to {url} failed: {e}"))),
    };

    let response = match http.get(&url).send().await {
        Ok(response) => response,
        Err(e) => return failed(e),
    };
    let status = response.status().as_u16();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return failed(e),
    };
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    Ok(ClientOutcome::Response { status, body })
}

/// The rustls error somewhere in `error`'s source chain, if any.
fn tls_refusal(error: &(dyn StdError + 'static)) -> Option<String> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return Some(tls.to_string());
        }
        if let Some(tls) = err
            .downcast_ref::<io::Error>()
            .and_then(io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            return Some(tls.to_string());
        }
        current = err.source();
    }
    None
}
