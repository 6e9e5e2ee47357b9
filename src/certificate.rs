//! Structured X.509 field decoding.
//!
//! Both the per-connection [`PeerCertificate`](crate::authz::PeerCertificate)
//! and the read-only [`inspect`](crate::inspect::inspect) service describe a
//! certificate with the same [`CertificateSummary`].  Everything here goes
//! through `x509-parser`; nothing reads textual tool output.
//!
//! Decoding is strict: trailing bytes after the DER structure, or a subject /
//! issuer attribute whose value is not a decodable string, fail the whole
//! certificate instead of producing a partial summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::certificate::X509Certificate;
use x509_parser::objects::{oid_registry, oid2sn};
use x509_parser::oid_registry::Oid;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;
use x509_parser::time::ASN1Time;
use x509_parser::x509::X509Name;

/// Distinguished Name as `attribute → value` (e.g. `"CN" → "client1"`).
///
/// Repeated attributes are joined with `", "`.  Attribute types without a
/// short label are keyed by their dotted OID.
pub type DistinguishedName = BTreeMap<String, String>;

/// Fields shared by every decoded certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    /// Subject DN.
    pub subject: DistinguishedName,
    /// Issuer DN.
    pub issuer: DistinguishedName,
    /// Start of the validity window (`notBefore`).
    pub valid_from: DateTime<Utc>,
    /// End of the validity window (`notAfter`).
    pub valid_to: DateTime<Utc>,
    /// Serial number, colon-separated hex.
    pub serial_number: String,
    /// Signature algorithm short name (dotted OID when unknown).
    pub signature_algorithm: String,
    /// Subject public key algorithm short name (dotted OID when unknown).
    pub public_key_algorithm: String,
    /// Public key size in bits, for RSA and EC keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_size_bits: Option<u32>,
}

impl CertificateSummary {
    /// Decode the summary of an already parsed certificate.
    pub(crate) fn from_x509(cert: &X509Certificate<'_>) -> Result<Self, String> {
        Ok(Self {
            subject: distinguished_name(cert.subject())?,
            issuer: distinguished_name(cert.issuer())?,
            valid_from: timestamp(cert.validity().not_before)?,
            valid_to: timestamp(cert.validity().not_after)?,
            serial_number: cert.raw_serial_as_string(),
            signature_algorithm: algorithm_name(&cert.signature_algorithm.algorithm),
            public_key_algorithm: algorithm_name(&cert.public_key().algorithm.algorithm),
            key_size_bits: key_size_bits(cert),
        })
    }

    /// Subject Common Name, if present.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.subject.get("CN").map(String::as_str)
    }

    /// Human-readable label for logs: the subject CN, or `"<unknown>"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.common_name().unwrap_or("<unknown>")
    }
}

/// Parse exactly one DER certificate.
pub(crate) fn parse_der(der: &[u8]) -> Result<X509Certificate<'_>, String> {
    let (rest, cert) = X509Certificate::from_der(der).map_err(|e| e.to_string())?;
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes after certificate", rest.len()));
    }
    Ok(cert)
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

fn distinguished_name(name: &X509Name<'_>) -> Result<DistinguishedName, String> {
    let mut dn = DistinguishedName::new();
    for attr in name.iter_attributes() {
        let label = attribute_label(attr.attr_type());
        let value = attr
            .as_str()
            .map_err(|e| format!("attribute {label} is not a string: {e}"))?;
        dn.entry(label)
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }
    Ok(dn)
}

/// Short label for the DN attribute types a certificate store normally uses.
fn attribute_label(oid: &Oid<'_>) -> String {
    let dotted = oid.to_id_string();
    let label = match dotted.as_str() {
        "2.5.4.3" => "CN",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.6" => "C",
        "1.2.840.113549.1.9.1" => "emailAddress",
        _ => return dotted,
    };
    label.to_owned()
}

fn algorithm_name(oid: &Oid<'_>) -> String {
    oid2sn(oid, oid_registry()).map_or_else(|_| oid.to_id_string(), str::to_owned)
}

fn key_size_bits(cert: &X509Certificate<'_>) -> Option<u32> {
    let bits = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => rsa.key_size(),
        Ok(PublicKey::EC(point)) => point.key_size(),
        _ => return None,
    };
    u32::try_from(bits).ok()
}

fn timestamp(time: ASN1Time) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| format!("validity timestamp out of range: {time}"))
}
