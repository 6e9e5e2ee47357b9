//! mTLS server
//!
//! Startup order is fixed: trust material is loaded and the rustls config
//! built in [`MtlsServer::new`], so a missing or mismatched file fails before
//! any socket is bound.

pub mod audit;
pub mod dispatch;
pub mod handshake;
mod listener;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tracing::info;

pub use audit::{AuditSink, HandshakeEvent, MemoryAuditSink, TracingAuditSink};
pub use dispatch::{DispatchResponse, Dispatcher, Endpoint};
pub use handshake::{ConnectionState, HandshakeOutcome, negotiate};

use self::listener::{ConnectionHandler, accept_loop};
use crate::config::Config;
use crate::trust::{ServerIdentity, TrustStore, build_server_config, load};
use crate::{Error, Result};

/// The mTLS server, with trust material loaded but no socket bound yet.
pub struct MtlsServer {
    config: Config,
    trust: Arc<TrustStore>,
    identity: Arc<ServerIdentity>,
    tls: Arc<rustls::ServerConfig>,
    audit: Arc<dyn AuditSink>,
}

impl MtlsServer {
    /// Load trust material and build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] naming the offending file if the CA bundle,
    /// server certificate or key is missing, unreadable, malformed or
    /// mismatched, and [`Error::Tls`] if rustls refuses the material.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let paths = config.trust.certificate_paths();
        let (trust, identity) = load(&paths)?;
        let tls = build_server_config(&trust, &identity, config.server.min_protocol_version)?;

        Ok(Self {
            config,
            trust: Arc::new(trust),
            identity: Arc::new(identity),
            tls: Arc::new(tls),
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Replace the default tracing audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Loaded CA anchors.
    #[must_use]
    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }

    /// Loaded server identity.
    #[must_use]
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is invalid or the port cannot be bound.
    pub async fn bind(self) -> Result<BoundServer> {
        let server = &self.config.server;
        let listener = TcpListener::bind((server.host.as_str(), server.port))
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "Cannot bind {}:{}: {e}",
                    server.host, server.port
                ))
            })?;
        let local_addr = listener.local_addr()?;

        let handler = Arc::new(ConnectionHandler {
            acceptor: TlsAcceptor::from(Arc::clone(&self.tls)),
            router: Dispatcher::new().into_router(),
            audit: Arc::clone(&self.audit),
            handshake_timeout: server.handshake_timeout,
        });

        info!(
            addr = %local_addr,
            server_cert = %self.identity.summary().display_name(),
            ca_count = self.trust.ca_certificates().len(),
            min_tls = ?server.min_protocol_version,
            "mTLS server listening, client certificates required"
        );

        Ok(BoundServer {
            listener,
            local_addr,
            handler,
            shutdown_timeout: server.shutdown_timeout,
        })
    }

    /// Bind and serve until ctrl-c or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn run(self) -> Result<()> {
        self.bind().await?.serve_until(shutdown_signal()).await
    }
}

/// A listening server.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<ConnectionHandler>,
    shutdown_timeout: std::time::Duration,
}

impl BoundServer {
    /// The bound address (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve connections until `shutdown` resolves, then drain.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; per-connection failures are audited
    /// and never end the loop.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        accept_loop(
            self.listener,
            self.handler,
            shutdown,
            self.shutdown_timeout,
        )
        .await;
        info!("mTLS server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{LocalCa, ProvisioningService, SubjectParams};
    use crate::store::CertificateStore;
    use crate::trust::LoadError;

    fn provisioned_config(dir: &std::path::Path) -> Config {
        let store = CertificateStore::new(dir);
        let ca = LocalCa::create(&SubjectParams::ca("Server Test CA")).unwrap();
        store.write_ca(&ca).unwrap();
        store
            .write_server(&ca.issue_certificate(&SubjectParams::server("localhost")).unwrap())
            .unwrap();

        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.trust.cert_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn new_loads_trust_material() {
        let dir = tempfile::tempdir().unwrap();
        let server = MtlsServer::new(provisioned_config(dir.path())).unwrap();
        assert_eq!(server.trust_store().ca_certificates().len(), 1);
        assert_eq!(server.identity().summary().common_name(), Some("localhost"));
    }

    #[test]
    fn missing_server_key_fails_before_bind() {
        // GIVEN: a provisioned store whose server key was removed
        let dir = tempfile::tempdir().unwrap();
        let config = provisioned_config(dir.path());
        std::fs::remove_file(dir.path().join("server.key")).unwrap();

        // WHEN: constructing the server
        let err = MtlsServer::new(config).err().unwrap();

        // THEN: a load error naming the key path
        match err {
            Error::Load(LoadError::MissingFile(path)) => {
                assert_eq!(path, dir.path().join("server.key"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bind_reports_ephemeral_port_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let bound = MtlsServer::new(provisioned_config(dir.path()))
            .unwrap()
            .bind()
            .await
            .unwrap();
        assert_ne!(bound.local_addr().port(), 0);

        // Already-resolved shutdown: the loop exits immediately.
        bound.serve_until(async {}).await.unwrap();
    }
}
