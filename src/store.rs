//! On-disk certificate store layout.
//!
//! ```text
//! <cert_dir>/
//!   ca.crt  ca.key                 CA (key only needed to issue)
//!   server.crt  server.key         server identity
//!   client<name>.crt  .key         zero or more client identities
//! ```
//!
//! Certificates are addressed by id: `ca`, `server`, or `client<name>`
//! where `<name>` is limited to `[A-Za-z0-9_-]`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::provision::{IssuedCertificate, LocalCa};
use crate::trust::CertificatePaths;
use crate::{Error, Result};

const CA_STEM: &str = "ca";
const SERVER_STEM: &str = "server";
const CLIENT_PREFIX: &str = "client";

/// A directory of PEM certificates and keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    /// Store rooted at `dir`.  The directory need not exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `ca.crt`
    #[must_use]
    pub fn ca_cert(&self) -> PathBuf {
        self.cert_path(CA_STEM)
    }

    /// `ca.key`
    #[must_use]
    pub fn ca_key(&self) -> PathBuf {
        self.key_path(CA_STEM)
    }

    /// `server.crt`
    #[must_use]
    pub fn server_cert(&self) -> PathBuf {
        self.cert_path(SERVER_STEM)
    }

    /// `server.key`
    #[must_use]
    pub fn server_key(&self) -> PathBuf {
        self.key_path(SERVER_STEM)
    }

    /// Private key path for a certificate id (`ca`, `server`,
    /// `client<name>`).
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an id outside that grammar.
    pub fn key_for(&self, id: &str) -> Result<PathBuf> {
        self.resolve(id)?;
        Ok(self.key_path(id))
    }

    /// The three files required to serve.
    #[must_use]
    pub fn paths(&self) -> CertificatePaths {
        CertificatePaths {
            ca_bundle: self.ca_cert(),
            server_cert: self.server_cert(),
            server_key: self.server_key(),
        }
    }

    /// Certificate path for an id (`ca`, `server`, `client<name>`).
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an id outside that grammar.
    pub fn resolve(&self, id: &str) -> Result<PathBuf> {
        match id {
            CA_STEM | SERVER_STEM => Ok(self.cert_path(id)),
            _ => {
                validate_client_name(id)?;
                Ok(self.cert_path(id))
            }
        }
    }

    /// Names (`client1`, `client2`, ...) of the client certificates present,
    /// sorted.  A missing directory has no clients.
    pub fn client_names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".crt")) else {
                continue;
            };
            if validate_client_name(stem).is_ok() {
                names.push(stem.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Whether CA, server cert and server key all exist.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        let paths = self.paths();
        paths.ca_bundle.exists() && paths.server_cert.exists() && paths.server_key.exists()
    }

    /// Read the persisted CA back for issuing.
    pub fn load_ca(&self) -> Result<LocalCa> {
        let cert_pem = read_string(&self.ca_cert())?;
        let key_pem = read_string(&self.ca_key())?;
        LocalCa::from_pem(&cert_pem, &key_pem)
    }

    /// Write `ca.crt` / `ca.key`.
    pub fn write_ca(&self, ca: &LocalCa) -> Result<()> {
        self.write_pair(&ca.to_issued(), CA_STEM)
    }

    /// Write `server.crt` / `server.key`.
    pub fn write_server(&self, cert: &IssuedCertificate) -> Result<()> {
        self.write_pair(cert, SERVER_STEM)
    }

    /// Write `<name>.crt` / `<name>.key` for a client id.
    pub fn write_client(&self, name: &str, cert: &IssuedCertificate) -> Result<()> {
        validate_client_name(name)?;
        self.write_pair(cert, name)
    }

    fn cert_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.crt"))
    }

    fn key_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.key"))
    }

    fn write_pair(&self, cert: &IssuedCertificate, stem: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Config(format!("Cannot create dir '{}': {e}", self.dir.display()))
        })?;

        fs::write(self.cert_path(stem), &cert.cert_pem)
            .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

        write_private_key(&self.key_path(stem), &cert.key_pem)
            .map_err(|e| Error::Config(format!("Cannot write key: {e}")))?;

        debug!(dir = %self.dir.display(), stem, "Wrote certificate pair");
        Ok(())
    }
}

/// Check that `name` is `client` followed by `[A-Za-z0-9_-]*`.
pub fn validate_client_name(name: &str) -> Result<()> {
    let valid = name.strip_prefix(CLIENT_PREFIX).is_some_and(|rest| {
        rest.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid certificate id '{name}': expected 'ca', 'server' or 'client<name>'"
        )))
    }
}

fn read_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))
}

/// Write a key file that is owner-only from creation on.
#[cfg(unix)]
fn write_private_key(path: &Path, pem: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; an overwritten key keeps its old bits.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(pem.as_bytes())
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, pem: &str) -> std::io::Result<()> {
    fs::write(path, pem)
}
