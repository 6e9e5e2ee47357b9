//! Accept loop and per-connection serving.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::audit::{AuditSink, HandshakeEvent};
use super::handshake::{ConnectionState, HandshakeOutcome, negotiate};

/// Everything a connection task needs, shared read-only across tasks.
pub(crate) struct ConnectionHandler {
    pub(crate) acceptor: TlsAcceptor,
    pub(crate) router: Router,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) handshake_timeout: Duration,
}

impl ConnectionHandler {
    /// Drive one connection from TCP accept to close.
    pub(crate) async fn handle(
        self: Arc<Self>,
        tcp: TcpStream,
        peer_addr: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let outcome = negotiate(&self.acceptor, tcp, Some(peer_addr), self.handshake_timeout).await;
        self.audit.record(&HandshakeEvent::from_context(outcome.context()));

        let HandshakeOutcome::Established { stream, context } = outcome else {
            return;
        };

        // The context rides along with every request on this connection.
        let service =
            TowerToHyperService::new(self.router.clone().layer(Extension(Arc::new(context))));
        let builder = auto::Builder::new(TokioExecutor::new());
        let conn = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let mut draining = false;
        let result = loop {
            tokio::select! {
                res = conn.as_mut() => break res,
                _ = shutdown.recv(), if !draining => {
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        };

        if let Err(e) = result {
            debug!(peer = %peer_addr, error = %e, "Connection ended with error");
        }
        debug!(peer = %peer_addr, state = %ConnectionState::Closed, "Connection closed");
    }
}

/// Accept connections until `shutdown` resolves, then give in-flight
/// connections `drain_timeout` to finish.
pub(crate) async fn accept_loop<F>(
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    shutdown: F,
    drain_timeout: Duration,
) where
    F: Future<Output = ()>,
{
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer_addr)) => {
                    debug!(peer = %peer_addr, state = %ConnectionState::Listening, "Connection accepted");
                    connections.spawn(Arc::clone(&handler).handle(tcp, peer_addr, shutdown_tx.subscribe()));
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Connection task failed");
                }
            }
        }
    }

    // Stop accepting before draining.
    drop(listener);
    let _ = shutdown_tx.send(());

    let in_flight = connections.len();
    if in_flight > 0 {
        info!(connections = in_flight, "Draining in-flight connections");
    }
    if tokio::time::timeout(drain_timeout, drain(&mut connections))
        .await
        .is_err()
    {
        warn!(
            remaining = connections.len(),
            "Shutdown timeout elapsed, aborting connections"
        );
        connections.abort_all();
    }
}

async fn drain(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}
