//! Audit trail for handshake outcomes.
//!
//! Every completed or refused handshake produces one [`HandshakeEvent`],
//! handed to the configured [`AuditSink`].  The default sink writes it to the
//! log as a JSON blob in the `audit` field:
//!
//! ```text
//! INFO mtls_guard::server::audit audit={"event":"handshake.accepted","peerAddr":"127.0.0.1:53012",...}
//! ```
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `handshake.accepted` | The peer presented a certificate chaining to a trusted CA |
//! | `handshake.rejected` | The handshake failed or the peer certificate was refused |

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::authz::{AuthFailureReason, AuthorizationContext};
use crate::certificate::DistinguishedName;

/// Event name for an authenticated handshake.
pub const HANDSHAKE_ACCEPTED: &str = "handshake.accepted";
/// Event name for a refused handshake.
pub const HANDSHAKE_REJECTED: &str = "handshake.rejected";

/// Structured audit record for one handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeEvent {
    /// Event type string.
    pub event: &'static str,
    /// Remote socket address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_addr: Option<SocketAddr>,
    /// Peer subject DN (accepted only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<DistinguishedName>,
    /// Peer issuer DN (accepted only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<DistinguishedName>,
    /// Peer certificate serial (accepted only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Failure reason (rejected only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AuthFailureReason>,
    /// When the handshake finished.
    pub timestamp: DateTime<Utc>,
}

impl HandshakeEvent {
    /// Build the event describing `context`.
    #[must_use]
    pub fn from_context(context: &AuthorizationContext) -> Self {
        match context.peer_identity() {
            Some(peer) => Self {
                event: HANDSHAKE_ACCEPTED,
                peer_addr: context.peer_addr(),
                subject: Some(peer.subject().clone()),
                issuer: Some(peer.issuer().clone()),
                serial_number: Some(peer.summary.serial_number.clone()),
                reason: None,
                timestamp: Utc::now(),
            },
            None => Self {
                event: HANDSHAKE_REJECTED,
                peer_addr: context.peer_addr(),
                subject: None,
                issuer: None,
                serial_number: None,
                reason: Some(
                    context
                        .failure_reason()
                        .unwrap_or(AuthFailureReason::ChainValidationFailed),
                ),
                timestamp: Utc::now(),
            },
        }
    }

    /// Whether this records an accepted handshake.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.event == HANDSHAKE_ACCEPTED
    }
}

/// Receives one event per handshake outcome.
///
/// Called from connection tasks, so implementations must be cheap and must
/// not block.
pub trait AuditSink: Send + Sync + 'static {
    /// Record a handshake outcome.
    fn record(&self, event: &HandshakeEvent);
}

/// Writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &HandshakeEvent) {
        match serde_json::to_string(event) {
            Ok(ref json) if event.is_accepted() => tracing::info!(audit = %json, "mTLS handshake accepted"),
            Ok(ref json) => tracing::warn!(audit = %json, "mTLS handshake rejected"),
            Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
        }
    }
}

/// Keeps events in memory, for tests and embedders that inspect outcomes.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<HandshakeEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<HandshakeEvent> {
        self.events.lock().clone()
    }

    /// Number of events recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &HandshakeEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::PeerCertificate;
    use rcgen::{CertificateParams, DnType, KeyPair};

    fn peer(cn: &str) -> PeerCertificate {
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, cn);
        let key = KeyPair::generate().unwrap();
        let der = params.self_signed(&key).unwrap().der().to_vec();
        PeerCertificate::from_verified_der(&der).unwrap()
    }

    fn addr() -> Option<SocketAddr> {
        Some("127.0.0.1:50000".parse().unwrap())
    }

    #[test]
    fn accepted_event_carries_identity_not_reason() {
        // GIVEN: an authenticated context
        let ctx = AuthorizationContext::authenticated(addr(), peer("client1"));

        // WHEN: build the event
        let event = HandshakeEvent::from_context(&ctx);

        // THEN: identity fields set, reason absent
        assert_eq!(event.event, HANDSHAKE_ACCEPTED);
        assert_eq!(event.subject.as_ref().unwrap()["CN"], "client1");
        assert!(event.reason.is_none());
        assert_eq!(event.peer_addr, addr());
    }

    #[test]
    fn rejected_event_carries_reason_not_identity() {
        let ctx = AuthorizationContext::rejected(addr(), AuthFailureReason::UnknownCa);
        let event = HandshakeEvent::from_context(&ctx);

        assert_eq!(event.event, HANDSHAKE_REJECTED);
        assert_eq!(event.reason, Some(AuthFailureReason::UnknownCa));
        assert!(event.subject.is_none());
        assert!(!event.is_accepted());
    }

    #[test]
    fn rejected_event_serialises_reason_identifier() {
        let ctx = AuthorizationContext::rejected(addr(), AuthFailureReason::UnknownCa);
        let json = serde_json::to_value(HandshakeEvent::from_context(&ctx)).unwrap();
        assert_eq!(json["reason"], "UnknownCA");
        assert_eq!(json["peerAddr"], "127.0.0.1:50000");
        assert!(json.get("subject").is_none());
    }

    #[test]
    fn memory_sink_keeps_events_in_order() {
        // GIVEN: an empty sink
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());

        // WHEN: two events recorded
        let rejected = AuthorizationContext::rejected(None, AuthFailureReason::CertificateExpired);
        let accepted = AuthorizationContext::authenticated(None, peer("client2"));
        sink.record(&HandshakeEvent::from_context(&rejected));
        sink.record(&HandshakeEvent::from_context(&accepted));

        // THEN: both present in order
        let events = sink.events();
        assert_eq!(sink.len(), 2);
        assert!(!events[0].is_accepted());
        assert!(events[1].is_accepted());
    }

    #[test]
    fn tracing_sink_does_not_panic() {
        let ctx = AuthorizationContext::rejected(addr(), AuthFailureReason::NoCertificatePresented);
        TracingAuditSink.record(&HandshakeEvent::from_context(&ctx));
    }
}
