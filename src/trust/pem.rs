//! PEM file loading.
//!
//! All certificate and key files are expected in **PEM format**.  Every
//! failure carries the offending path so startup errors point straight at the
//! file to fix.

use std::fs;
use std::io;
use std::path::Path;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use super::LoadError;

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// [`LoadError::MissingFile`] / [`LoadError::Unreadable`] when the file
/// cannot be read, [`LoadError::ParseError`] when a PEM block is malformed or
/// the file holds no certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, LoadError> {
    let pem_data = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem_data)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoadError::parse(path, format!("malformed certificate PEM: {e}")))?;

    if certs.is_empty() {
        return Err(LoadError::parse(path, "no certificates found"));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports PKCS#8 (`PRIVATE KEY`), PKCS#1 (`RSA PRIVATE KEY`) and SEC1
/// (`EC PRIVATE KEY`) blocks.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, LoadError> {
    let pem_data = read_file(path)?;
    PrivateKeyDer::from_pem_slice(&pem_data).map_err(|e| match e {
        rustls::pki_types::pem::Error::NoItemsFound => {
            LoadError::parse(path, "no private key found")
        }
        other => LoadError::parse(path, format!("malformed private key PEM: {other}")),
    })
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            LoadError::MissingFile(path.to_path_buf())
        } else {
            LoadError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}
