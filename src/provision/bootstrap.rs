//! Store-level provisioning: populate a fresh store, add clients.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use super::{LocalCa, ProvisioningService, SubjectParams};
use crate::store::{CertificateStore, validate_client_name};
use crate::{Error, Result};

/// Client ids created by [`bootstrap`].
pub const DEFAULT_CLIENTS: [&str; 2] = ["client1", "client2"];

/// What [`bootstrap`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Ids written.
    pub created: Vec<String>,
    /// Ids left untouched because they already existed.
    pub skipped: Vec<String>,
}

/// Create `ca`, `server`, `client1` and `client2` in `store`.
///
/// Existing certificates are kept unless `force` is set.  A newly created CA
/// always reissues everything after it, since certificates from an older CA
/// would no longer chain.
///
/// # Errors
///
/// Returns an error if an existing CA cannot be read back or a file cannot
/// be written.
pub fn bootstrap(
    store: &CertificateStore,
    ca_name: &str,
    server_name: &str,
    force: bool,
) -> Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    let reuse_ca = !force && store.ca_cert().exists();
    let ca = if reuse_ca {
        report.skipped.push("ca".to_owned());
        store.load_ca()?
    } else {
        let ca = LocalCa::create(&SubjectParams::ca(ca_name))?;
        store.write_ca(&ca)?;
        report.created.push("ca".to_owned());
        ca
    };
    let reissue = !reuse_ca;

    if reissue || !store.server_cert().exists() {
        let server = ca.issue_certificate(&SubjectParams::server(server_name))?;
        store.write_server(&server)?;
        report.created.push("server".to_owned());
    } else {
        report.skipped.push("server".to_owned());
    }

    for name in DEFAULT_CLIENTS {
        if reissue || !store.resolve(name)?.exists() {
            let client = ca.issue_certificate(&SubjectParams::client(name))?;
            store.write_client(name, &client)?;
            report.created.push(name.to_owned());
        } else {
            report.skipped.push(name.to_owned());
        }
    }

    info!(
        dir = %store.dir().display(),
        created = ?report.created,
        skipped = ?report.skipped,
        "Certificate store initialised"
    );
    Ok(report)
}

/// Issue client certificate `name` from the stored CA.
///
/// `subject.common_name` is used as given; callers normally set it to
/// `name`.
///
/// # Errors
///
/// Returns an error for an invalid id, an existing certificate without
/// `force`, a store without CA key, or a write failure.
pub fn issue_client(
    store: &CertificateStore,
    name: &str,
    subject: &SubjectParams,
    force: bool,
) -> Result<PathBuf> {
    validate_client_name(name)?;
    let path = store.resolve(name)?;
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "Certificate '{name}' already exists at {} (use --force to replace it)",
            path.display()
        )));
    }

    let ca: LocalCa = store.load_ca()?;
    let issued = ca.issue_certificate(subject)?;
    store.write_client(name, &issued)?;

    info!(name, path = %path.display(), "Issued client certificate");
    Ok(path)
}
