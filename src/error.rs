//! Error types for mtls-guard

use std::io;

use thiserror::Error;

use crate::inspect::InspectionError;
use crate::trust::LoadError;

/// Result type alias for mtls-guard
pub type Result<T> = std::result::Result<T, Error>;

/// mtls-guard errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Trust material could not be loaded at startup
    #[error("Trust store error: {0}")]
    Load(#[from] LoadError),

    /// A stored certificate could not be decoded for display
    #[error("Inspection error: {0}")]
    Inspection(#[from] InspectionError),

    /// Certificate issuance failed
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// rustls rejected the TLS configuration
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// HTTP request to a server failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error happened before the listener could be started.
    ///
    /// Startup errors are fatal: the process must exit without binding.
    #[must_use]
    pub fn is_startup_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Load(_) | Self::Tls(_))
    }
}
