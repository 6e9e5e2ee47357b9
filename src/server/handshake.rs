//! Per-connection TLS handshake policy.
//!
//! ```text
//! Listening ──accept──▶ HandshakeInProgress ──ok──▶ Established ──▶ Closed
//!                                  │
//!                                  └──fail / timeout──▶ Closed
//! ```
//!
//! The verdict on the client certificate is rustls' alone: the verifier in
//! [`crate::trust::build_server_config`] refuses anything that does not chain
//! to the trust store, and this module only translates the result into an
//! [`AuthorizationContext`].

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::debug;

use crate::authz::{
    AuthFailureReason, AuthorizationContext, PeerCertificate, classify_handshake_error,
};

/// Lifecycle of one inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting in the accept queue.
    Listening,
    /// TCP accepted, TLS negotiation running.
    HandshakeInProgress,
    /// Handshake complete, peer authenticated.
    Established,
    /// Connection torn down.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Listening => "listening",
            Self::HandshakeInProgress => "handshake_in_progress",
            Self::Established => "established",
            Self::Closed => "closed",
        })
    }
}

/// Result of [`negotiate`].
pub enum HandshakeOutcome<IO> {
    /// The peer is authenticated; serve requests on `stream`.
    Established {
        /// The TLS stream, ready for application data.
        stream: Box<TlsStream<IO>>,
        /// Always authenticated.
        context: AuthorizationContext,
    },
    /// The peer was refused and the transport dropped.
    Closed {
        /// Always rejected.
        context: AuthorizationContext,
    },
}

impl<IO> HandshakeOutcome<IO> {
    /// The authorization context of the connection.
    pub fn context(&self) -> &AuthorizationContext {
        match self {
            Self::Established { context, .. } | Self::Closed { context } => context,
        }
    }

    /// The state the connection ended up in.
    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Established { .. } => ConnectionState::Established,
            Self::Closed { .. } => ConnectionState::Closed,
        }
    }
}

impl<IO> fmt::Debug for HandshakeOutcome<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeOutcome")
            .field("state", &self.state())
            .field("context", self.context())
            .finish()
    }
}

/// Run the server side of the TLS handshake on `io`.
///
/// Exactly one attempt is made.  A handshake that does not finish within
/// `timeout` is a `ChainValidationFailed` rejection.
pub async fn negotiate<IO>(
    acceptor: &TlsAcceptor,
    io: IO,
    peer_addr: Option<SocketAddr>,
    timeout: Duration,
) -> HandshakeOutcome<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    debug!(
        peer = ?peer_addr,
        state = %ConnectionState::HandshakeInProgress,
        "TLS handshake started"
    );

    let rejected = |reason: AuthFailureReason| {
        debug!(peer = ?peer_addr, state = %ConnectionState::Closed, %reason, "TLS handshake failed");
        HandshakeOutcome::Closed {
            context: AuthorizationContext::rejected(peer_addr, reason),
        }
    };

    let mut stream = match tokio::time::timeout(timeout, acceptor.accept(io)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(peer = ?peer_addr, error = %e, "TLS accept error");
            return rejected(classify_handshake_error(&e));
        }
        Err(_) => {
            debug!(peer = ?peer_addr, timeout = ?timeout, "TLS handshake timed out");
            return rejected(AuthFailureReason::ChainValidationFailed);
        }
    };

    let peer = match stream.get_ref().1.peer_certificates() {
        Some([end_entity, ..]) => PeerCertificate::from_verified_der(end_entity),
        _ => Err(AuthFailureReason::NoCertificatePresented),
    };

    match peer {
        Ok(peer) => {
            debug!(
                peer = ?peer_addr,
                subject = %peer.display_name(),
                state = %ConnectionState::Established,
                "TLS handshake complete"
            );
            HandshakeOutcome::Established {
                stream: Box::new(stream),
                context: AuthorizationContext::authenticated(peer_addr, peer),
            }
        }
        Err(reason) => {
            // Accepted by rustls but unusable: close without serving data.
            let _ = stream.shutdown().await;
            rejected(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, Utc};
    use rustls::pki_types::pem::PemObject;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
    use rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    use super::*;
    use crate::provision::{IssuedCertificate, LocalCa, ProvisioningService, SubjectParams};
    use crate::store::CertificateStore;
    use crate::trust::{TlsVersion, build_server_config, crypto_provider, load};

    struct Pki {
        ca: LocalCa,
        acceptor: TlsAcceptor,
        _dir: tempfile::TempDir,
    }

    fn pki() -> Pki {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path());
        let ca = LocalCa::create(&SubjectParams::ca("Handshake Test CA")).unwrap();
        store.write_ca(&ca).unwrap();
        let server = ca
            .issue_certificate(&SubjectParams::server("localhost"))
            .unwrap();
        store.write_server(&server).unwrap();

        let (trust, identity) = load(&store.paths()).unwrap();
        let config = build_server_config(&trust, &identity, TlsVersion::Tls13).unwrap();
        Pki {
            ca,
            acceptor: TlsAcceptor::from(Arc::new(config)),
            _dir: dir,
        }
    }

    fn client_config(ca_pem: &str, client: Option<&IssuedCertificate>) -> ClientConfig {
        let mut roots = RootCertStore::empty();
        roots
            .add(CertificateDer::from_pem_slice(ca_pem.as_bytes()).unwrap())
            .unwrap();
        let builder = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots);
        match client {
            Some(issued) => {
                let chain = CertificateDer::pem_slice_iter(issued.cert_pem.as_bytes())
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap();
                let key = PrivateKeyDer::from_pem_slice(issued.key_pem.as_bytes()).unwrap();
                builder.with_client_auth_cert(chain, key).unwrap()
            }
            None => builder.with_no_client_auth(),
        }
    }

    async fn handshake(pki: &Pki, client: ClientConfig) -> HandshakeOutcome<tokio::io::DuplexStream> {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let connector = TlsConnector::from(Arc::new(client));
        let client_task = tokio::spawn(async move {
            let name = ServerName::try_from("localhost").unwrap();
            connector.connect(name, client_io).await
        });

        let outcome = negotiate(&pki.acceptor, server_io, None, Duration::from_secs(5)).await;
        let _ = client_task.await;
        outcome
    }

    #[tokio::test]
    async fn valid_client_is_established_with_identity() {
        // GIVEN: a client certificate issued by the trusted CA
        let pki = pki();
        let client = pki
            .ca
            .issue_certificate(&SubjectParams::client("client1"))
            .unwrap();

        // WHEN: handshake
        let outcome = handshake(&pki, client_config(pki.ca.certificate_pem(), Some(&client))).await;

        // THEN: established, CN extracted
        assert_eq!(outcome.state(), ConnectionState::Established);
        let peer = outcome.context().peer_identity().unwrap();
        assert_eq!(peer.common_name(), Some("client1"));
        assert_eq!(peer.issuer()["CN"], "Handshake Test CA");
        assert!(peer.chain_valid);
    }

    #[tokio::test]
    async fn missing_client_certificate_is_rejected() {
        let pki = pki();
        let outcome = handshake(&pki, client_config(pki.ca.certificate_pem(), None)).await;

        assert_eq!(outcome.state(), ConnectionState::Closed);
        assert_eq!(
            outcome.context().failure_reason(),
            Some(AuthFailureReason::NoCertificatePresented)
        );
    }

    #[tokio::test]
    async fn expired_client_certificate_is_rejected() {
        // GIVEN: a client certificate that expired yesterday
        let pki = pki();
        let now = Utc::now();
        let expired = pki
            .ca
            .issue_certificate(
                &SubjectParams::client("client-old")
                    .valid_between(now - ChronoDuration::days(30), now - ChronoDuration::days(1)),
            )
            .unwrap();

        // WHEN
        let outcome = handshake(&pki, client_config(pki.ca.certificate_pem(), Some(&expired))).await;

        // THEN
        assert_eq!(
            outcome.context().failure_reason(),
            Some(AuthFailureReason::CertificateExpired)
        );
    }

    #[tokio::test]
    async fn not_yet_valid_client_certificate_is_rejected() {
        let pki = pki();
        let now = Utc::now();
        let future = pki
            .ca
            .issue_certificate(
                &SubjectParams::client("client-future")
                    .valid_between(now + ChronoDuration::days(1), now + ChronoDuration::days(30)),
            )
            .unwrap();

        let outcome = handshake(&pki, client_config(pki.ca.certificate_pem(), Some(&future))).await;

        assert_eq!(
            outcome.context().failure_reason(),
            Some(AuthFailureReason::CertificateNotYetValid)
        );
    }

    #[tokio::test]
    async fn client_from_unrelated_ca_is_rejected() {
        // GIVEN: a client certificate from a CA the server does not trust
        let pki = pki();
        let rogue = LocalCa::create(&SubjectParams::ca("Rogue CA")).unwrap();
        let client = rogue
            .issue_certificate(&SubjectParams::client("client-rogue"))
            .unwrap();

        // WHEN
        let outcome = handshake(&pki, client_config(pki.ca.certificate_pem(), Some(&client))).await;

        // THEN
        assert_eq!(
            outcome.context().failure_reason(),
            Some(AuthFailureReason::UnknownCa)
        );
    }

    #[tokio::test]
    async fn forged_issuer_name_fails_signature_check() {
        // GIVEN: an impostor CA carrying the trusted CA's exact name
        let pki = pki();
        let impostor = LocalCa::create(&SubjectParams::ca("Handshake Test CA")).unwrap();
        let client = impostor
            .issue_certificate(&SubjectParams::client("client-forged"))
            .unwrap();

        // WHEN: its client certificate is presented
        let outcome = handshake(&pki, client_config(pki.ca.certificate_pem(), Some(&client))).await;

        // THEN: the issuer name matches but the signature does not
        assert_eq!(outcome.state(), ConnectionState::Closed);
        assert_eq!(
            outcome.context().failure_reason(),
            Some(AuthFailureReason::ChainValidationFailed)
        );
    }

    #[tokio::test]
    async fn silent_peer_times_out_as_validation_failure() {
        // GIVEN: a peer that connects and never speaks
        let pki = pki();
        let (_client_io, server_io) = tokio::io::duplex(1024);

        // WHEN: short handshake timeout
        let outcome = negotiate(&pki.acceptor, server_io, None, Duration::from_millis(50)).await;

        // THEN
        assert_eq!(
            outcome.context().failure_reason(),
            Some(AuthFailureReason::ChainValidationFailed)
        );
    }

    #[tokio::test]
    async fn garbage_instead_of_client_hello_is_validation_failure() {
        let pki = pki();
        let (mut client_io, server_io) = tokio::io::duplex(1024);
        client_io
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let outcome = negotiate(&pki.acceptor, server_io, None, Duration::from_secs(5)).await;

        assert_eq!(
            outcome.context().failure_reason(),
            Some(AuthFailureReason::ChainValidationFailed)
        );
    }

    #[test]
    fn connection_state_displays_snake_case() {
        assert_eq!(ConnectionState::HandshakeInProgress.to_string(), "handshake_in_progress");
        assert_eq!(ConnectionState::Listening.to_string(), "listening");
    }
}
