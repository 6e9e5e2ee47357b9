//! Mapping TLS handshake failures onto [`AuthFailureReason`].
//!
//! rustls reports client certificate problems as `rustls::Error`, which
//! `tokio-rustls` wraps in an `io::Error`.  Anything that is not a
//! recognisable certificate verdict (protocol errors, alerts from the peer,
//! plain IO failures) is a `ChainValidationFailed`.

use std::io;

use rustls::CertificateError;

use super::context::AuthFailureReason;

/// Classify the error returned by a failed TLS accept.
#[must_use]
pub fn classify_handshake_error(err: &io::Error) -> AuthFailureReason {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .map_or(AuthFailureReason::ChainValidationFailed, classify_tls_error)
}

/// Classify a rustls error.
#[must_use]
pub fn classify_tls_error(err: &rustls::Error) -> AuthFailureReason {
    match err {
        rustls::Error::NoCertificatesPresented => AuthFailureReason::NoCertificatePresented,
        rustls::Error::InvalidCertificate(cert_err) => classify_certificate_error(cert_err),
        _ => AuthFailureReason::ChainValidationFailed,
    }
}

fn classify_certificate_error(err: &CertificateError) -> AuthFailureReason {
    match err {
        CertificateError::Expired | CertificateError::ExpiredContext { .. } => {
            AuthFailureReason::CertificateExpired
        }
        CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
            AuthFailureReason::CertificateNotYetValid
        }
        CertificateError::UnknownIssuer => AuthFailureReason::UnknownCa,
        _ => AuthFailureReason::ChainValidationFailed,
    }
}
