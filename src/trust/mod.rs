//! Trust material: CA anchors, the server identity, and the rustls config
//! built from them.
//!
//! ```text
//! certs/ca.crt      ─┐
//! certs/server.crt  ─┼─ load() ─→ (TrustStore, ServerIdentity) ─→ build_server_config()
//! certs/server.key  ─┘
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod pem;
pub mod store;
pub mod tls;

pub use store::{CaCertificate, CertificatePaths, ServerIdentity, TrustStore, load};
pub use tls::{TlsVersion, build_server_config, crypto_provider};

/// Why trust material could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A required file does not exist.
    #[error("required file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// A required file exists but could not be read.
    #[error("cannot read '{}': {source}", path.display())]
    Unreadable {
        /// The file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A file is not a well-formed PEM certificate or key.
    #[error("invalid content in '{}': {detail}", path.display())]
    ParseError {
        /// The file.
        path: PathBuf,
        /// What was wrong with it.
        detail: String,
    },

    /// The server key does not belong to the server certificate.
    #[error(
        "server key '{}' does not match the public key of '{}'",
        key.display(),
        cert.display()
    )]
    KeyMismatch {
        /// Server certificate path.
        cert: PathBuf,
        /// Server key path.
        key: PathBuf,
    },
}

impl LoadError {
    pub(crate) fn parse(path: &Path, detail: impl Into<String>) -> Self {
        Self::ParseError {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }

    /// The file this error is about (the key file for a mismatch).
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::MissingFile(path)
            | Self::Unreadable { path, .. }
            | Self::ParseError { path, .. } => path,
            Self::KeyMismatch { key, .. } => key,
        }
    }
}
