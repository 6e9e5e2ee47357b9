//! Per-connection authorization state.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::peer::PeerCertificate;

/// Why a connection was not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthFailureReason {
    /// The client sent no certificate.
    NoCertificatePresented,
    /// The certificate (or the handshake carrying it) failed validation for
    /// a reason other than the ones below.
    ChainValidationFailed,
    /// `notAfter` is in the past.
    CertificateExpired,
    /// `notBefore` is in the future.
    CertificateNotYetValid,
    /// The certificate does not chain to a configured CA.
    #[serde(rename = "UnknownCA")]
    UnknownCa,
}

impl AuthFailureReason {
    /// Stable identifier used in responses and audit events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoCertificatePresented => "NoCertificatePresented",
            Self::ChainValidationFailed => "ChainValidationFailed",
            Self::CertificateExpired => "CertificateExpired",
            Self::CertificateNotYetValid => "CertificateNotYetValid",
            Self::UnknownCa => "UnknownCA",
        }
    }
}

impl fmt::Display for AuthFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the handshake for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// The peer presented a valid certificate.
    Authenticated {
        /// The peer's certificate fields.
        peer: PeerCertificate,
    },
    /// The peer was refused.
    Rejected {
        /// Why.
        reason: AuthFailureReason,
    },
}

/// Immutable authorization state of one connection.
///
/// Built once when the handshake finishes and handed to the request
/// dispatcher for every request on that connection.  Fields are private so
/// nothing downstream can alter the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    peer_addr: Option<SocketAddr>,
    result: AuthorizationResult,
}

impl AuthorizationContext {
    /// Context for an authenticated peer.
    #[must_use]
    pub fn authenticated(peer_addr: Option<SocketAddr>, peer: PeerCertificate) -> Self {
        Self {
            peer_addr,
            result: AuthorizationResult::Authenticated { peer },
        }
    }

    /// Context for a refused peer.
    #[must_use]
    pub fn rejected(peer_addr: Option<SocketAddr>, reason: AuthFailureReason) -> Self {
        Self {
            peer_addr,
            result: AuthorizationResult::Rejected { reason },
        }
    }

    /// Whether the peer passed certificate validation.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.result, AuthorizationResult::Authenticated { .. })
    }

    /// The validated peer certificate, if authenticated.
    #[must_use]
    pub fn peer_identity(&self) -> Option<&PeerCertificate> {
        match &self.result {
            AuthorizationResult::Authenticated { peer } => Some(peer),
            AuthorizationResult::Rejected { .. } => None,
        }
    }

    /// The failure reason, if rejected.
    #[must_use]
    pub fn failure_reason(&self) -> Option<AuthFailureReason> {
        match self.result {
            AuthorizationResult::Authenticated { .. } => None,
            AuthorizationResult::Rejected { reason } => Some(reason),
        }
    }

    /// Remote socket address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// The underlying result.
    #[must_use]
    pub fn result(&self) -> &AuthorizationResult {
        &self.result
    }
}
