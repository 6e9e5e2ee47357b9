//! Peer certificate extraction.
//!
//! Parses the DER end-entity certificate rustls has already verified and
//! extracts the fields exposed to request handling.  This runs on the trust
//! path, so decoding is all-or-nothing: a certificate the TLS stack accepted
//! but whose fields cannot be decoded is refused, never partially accepted.

use serde::Serialize;

use super::context::AuthFailureReason;
use crate::certificate::{CertificateSummary, DistinguishedName, parse_der};

/// Fields of a validated client certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerCertificate {
    /// Subject, issuer, validity, serial and algorithms.
    #[serde(flatten)]
    pub summary: CertificateSummary,
    /// Chains to a configured CA and is inside its validity window.
    pub chain_valid: bool,
}

impl PeerCertificate {
    /// Build from the end-entity certificate of a completed handshake.
    ///
    /// Only call this with a certificate the client verifier accepted: the
    /// result is marked `chain_valid`.
    ///
    /// # Errors
    ///
    /// [`AuthFailureReason::ChainValidationFailed`] if the certificate cannot
    /// be decoded unambiguously.
    pub fn from_verified_der(der: &[u8]) -> Result<Self, AuthFailureReason> {
        let cert = parse_der(der).map_err(|_| AuthFailureReason::ChainValidationFailed)?;
        let summary = CertificateSummary::from_x509(&cert)
            .map_err(|_| AuthFailureReason::ChainValidationFailed)?;
        Ok(Self {
            summary,
            chain_valid: true,
        })
    }

    /// Subject DN.
    #[must_use]
    pub fn subject(&self) -> &DistinguishedName {
        &self.summary.subject
    }

    /// Issuer DN.
    #[must_use]
    pub fn issuer(&self) -> &DistinguishedName {
        &self.summary.issuer
    }

    /// Subject Common Name.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.summary.common_name()
    }

    /// Label for logs and audit events.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.summary.display_name()
    }
}
