//! Certificate inspection for display.
//!
//! Read-only diagnostics over stored certificates.  Nothing on the
//! handshake/authorization path calls into this module, so a decoding quirk
//! here cannot change a trust decision.

use std::fs;
use std::path::PathBuf;

use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use serde::Serialize;
use thiserror::Error;

use crate::Result;
use crate::certificate::{CertificateSummary, parse_der};
use crate::store::CertificateStore;

/// A certificate could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectionError {
    /// Input is not exactly one valid PEM or DER certificate.
    #[error("unparseable certificate: {0}")]
    Unparseable(String),
}

/// Structured fields of a stored certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateFields {
    /// Subject, issuer, validity, serial and algorithms.
    #[serde(flatten)]
    pub summary: CertificateSummary,
    /// X.509 version (3 for every certificate this crate issues).
    pub version: u32,
    /// Subject and issuer DNs are identical.
    pub self_signed: bool,
    /// Basic constraints mark the certificate as a CA.
    pub is_ca: bool,
    /// The current time lies inside the validity window.
    pub currently_valid: bool,
}

/// Decode one certificate, PEM or DER.
///
/// # Errors
///
/// [`InspectionError::Unparseable`] for anything other than exactly one
/// well-formed certificate: malformed encodings, trailing data, or a PEM file
/// holding several certificates.
pub fn inspect(certificate_bytes: &[u8]) -> std::result::Result<CertificateFields, InspectionError> {
    let der = if looks_like_pem(certificate_bytes) {
        single_pem_certificate(certificate_bytes)?
    } else {
        CertificateDer::from(certificate_bytes.to_vec())
    };

    let cert = parse_der(&der).map_err(InspectionError::Unparseable)?;
    let summary = CertificateSummary::from_x509(&cert).map_err(InspectionError::Unparseable)?;

    Ok(CertificateFields {
        summary,
        version: cert.version().0 + 1,
        self_signed: cert.subject().as_raw() == cert.issuer().as_raw(),
        is_ca: cert.is_ca(),
        currently_valid: cert.validity().is_valid(),
    })
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    bytes.trim_ascii_start().starts_with(b"-----BEGIN")
}

fn single_pem_certificate(
    bytes: &[u8],
) -> std::result::Result<CertificateDer<'static>, InspectionError> {
    let mut certs = CertificateDer::pem_slice_iter(bytes)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| InspectionError::Unparseable(format!("malformed PEM: {e}")))?;
    match certs.len() {
        1 if is_lone_certificate_block(bytes) => Ok(certs.remove(0)),
        1 => Err(InspectionError::Unparseable(
            "unexpected data around the certificate block".to_owned(),
        )),
        0 => Err(InspectionError::Unparseable(
            "no certificate block found".to_owned(),
        )),
        n => Err(InspectionError::Unparseable(format!(
            "expected one certificate, found {n}"
        ))),
    }
}

/// Only whitespace outside the single BEGIN/END CERTIFICATE pair.
/// `pem_slice_iter` skips foreign text and other block types, so this is
/// checked on the raw bytes.
fn is_lone_certificate_block(bytes: &[u8]) -> bool {
    const BEGIN: &[u8] = b"-----BEGIN CERTIFICATE-----";
    const END: &[u8] = b"-----END CERTIFICATE-----";

    let trimmed = bytes.trim_ascii();
    let markers = trimmed.windows(5).filter(|w| *w == b"-----").count();
    trimmed.starts_with(BEGIN) && trimmed.ends_with(END) && markers == 4
}

// ─────────────────────────────────────────────────────────────────────────────
// Store inventory
// ─────────────────────────────────────────────────────────────────────────────

/// Every certificate in a [`CertificateStore`].
#[derive(Debug, Serialize)]
pub struct StoreInventory {
    /// `ca.crt`, when present.
    pub ca: Option<InventoryEntry>,
    /// `server.crt`, when present.
    pub server: Option<InventoryEntry>,
    /// Discovered `client*.crt` files.
    pub clients: Vec<InventoryEntry>,
}

/// One stored certificate.
#[derive(Debug, Serialize)]
pub struct InventoryEntry {
    /// Certificate id (`ca`, `server`, `client1`, ...).
    pub name: String,
    /// File path.
    pub path: PathBuf,
    /// Decoded fields, when the file could be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateFields>,
    /// Why the file could not be read or decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Describe every certificate in `store`.
///
/// Absent files are `None`; a file that cannot be decoded is listed with its
/// error instead of failing the whole inventory.
pub fn inventory(store: &CertificateStore) -> Result<StoreInventory> {
    let clients = store
        .client_names()?
        .into_iter()
        .filter_map(|name| {
            let path = store.resolve(&name).ok()?;
            entry(name, path)
        })
        .collect();

    Ok(StoreInventory {
        ca: entry("ca".to_owned(), store.ca_cert()),
        server: entry("server".to_owned(), store.server_cert()),
        clients,
    })
}

fn entry(name: String, path: PathBuf) -> Option<InventoryEntry> {
    if !path.exists() {
        return None;
    }
    let (certificate, error) = match fs::read(&path) {
        Ok(bytes) => match inspect(&bytes) {
            Ok(fields) => (Some(fields), None),
            Err(e) => (None, Some(e.to_string())),
        },
        Err(e) => (None, Some(e.to_string())),
    };
    Some(InventoryEntry {
        name,
        path,
        certificate,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{LocalCa, ProvisioningService, SubjectParams};

    fn ca() -> LocalCa {
        LocalCa::create(&SubjectParams::ca("Inspect CA")).unwrap()
    }

    #[test]
    fn inspect_accepts_pem() {
        let fields = inspect(ca().certificate_pem().as_bytes()).unwrap();
        assert_eq!(fields.summary.common_name(), Some("Inspect CA"));
        assert_eq!(fields.version, 3);
        assert!(fields.currently_valid);
    }

    #[test]
    fn inspect_accepts_der() {
        // GIVEN: the DER inside a PEM
        let pem = ca().certificate_pem().to_owned();
        let der = CertificateDer::from_pem_slice(pem.as_bytes()).unwrap();
        // THEN: same fields either way
        assert_eq!(inspect(&der).unwrap(), inspect(pem.as_bytes()).unwrap());
    }

    #[test]
    fn inspect_rejects_garbage() {
        let err = inspect(b"definitely not a certificate").unwrap_err();
        assert!(matches!(err, InspectionError::Unparseable(_)));
    }

    #[test]
    fn inspect_rejects_pem_without_certificate() {
        let key_only = rcgen::KeyPair::generate().unwrap().serialize_pem();
        let err = inspect(key_only.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("no certificate"));
    }

    #[test]
    fn inspect_rejects_bundle_of_two() {
        let bundle = format!("{}{}", ca().certificate_pem(), ca().certificate_pem());
        let err = inspect(bundle.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("found 2"), "{err}");
    }

    #[test]
    fn inspect_rejects_text_after_pem_block() {
        // GIVEN: a valid PEM certificate followed by junk
        let pem = format!("{}\nTRAILING GARBAGE NOT A CERT\n", ca().certificate_pem());

        // WHEN
        let err = inspect(pem.as_bytes()).unwrap_err();

        // THEN: ambiguous input is refused, not silently trimmed
        assert!(err.to_string().contains("unexpected data"), "{err}");
    }

    #[test]
    fn inspect_rejects_text_before_pem_block() {
        let pem = format!("-----BEGIN junk\n{}", ca().certificate_pem());
        assert!(inspect(pem.as_bytes()).is_err());
    }

    #[test]
    fn inspect_rejects_certificate_followed_by_key_block() {
        let issued = ca().to_issued();
        let combined = format!("{}{}", issued.cert_pem, issued.key_pem);
        let err = inspect(combined.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unexpected data"), "{err}");
    }

    #[test]
    fn inspect_tolerates_surrounding_whitespace() {
        let pem = format!("\n\n{}\n\n", ca().certificate_pem());
        assert!(inspect(pem.as_bytes()).is_ok());
    }

    #[test]
    fn inspect_rejects_truncated_der() {
        let pem = ca().certificate_pem().to_owned();
        let der = CertificateDer::from_pem_slice(pem.as_bytes()).unwrap();
        assert!(inspect(&der[..der.len() / 2]).is_err());
    }

    #[test]
    fn fields_serialise_camel_case_and_flat() {
        let fields = inspect(ca().certificate_pem().as_bytes()).unwrap();
        let json = serde_json::to_value(&fields).unwrap();
        assert!(json.get("validFrom").is_some());
        assert!(json.get("serialNumber").is_some());
        assert!(json.get("selfSigned").is_some());
        assert!(json.get("summary").is_none());
    }

    #[test]
    fn inventory_lists_present_material_and_reports_bad_files() {
        // GIVEN: CA + one good client + one corrupt client, no server
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        let ca = ca();
        store.write_ca(&ca).unwrap();
        let good = ca.issue_certificate(&SubjectParams::client("client1")).unwrap();
        store.write_client("client1", &good).unwrap();
        fs::write(dir.path().join("client2.crt"), "corrupt").unwrap();

        // WHEN
        let inv = inventory(&store).unwrap();

        // THEN
        assert!(inv.ca.as_ref().and_then(|e| e.certificate.as_ref()).is_some());
        assert!(inv.server.is_none());
        assert_eq!(inv.clients.len(), 2);
        assert!(inv.clients[0].certificate.is_some());
        assert!(inv.clients[1].error.is_some());
    }
}
