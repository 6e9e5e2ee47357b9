//! mtls-guard
//!
//! A mutual-TLS server: every client must present an X.509 certificate that
//! chains to a configured CA, and only authenticated connections reach the
//! request handlers.
//!
//! # Features
//!
//! - **Mandatory client certificates**: rustls verifier with no
//!   unauthenticated fallback, TLS 1.3 by default
//! - **Per-connection authorization context**: validated identity or a typed
//!   failure reason, built once at handshake completion
//! - **Handshake audit trail**: one structured event per accepted or refused
//!   client
//! - **Certificate store tooling**: local CA, client issuance, inspection
//! - **Client tester**: call a running server as any stored client
//!
//! # Layout
//!
//! ```text
//! trust ──▶ server::handshake ──▶ authz::AuthorizationContext ──▶ server::dispatch
//!   ▲
//! store ◀── provision / inspect
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod certificate;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod inspect;
pub mod provision;
pub mod server;
pub mod store;
pub mod trust;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
