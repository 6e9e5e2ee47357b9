//! Request dispatch for authenticated connections.
//!
//! Every request goes through [`Dispatcher::dispatch`], which consults the
//! connection's [`AuthorizationContext`] before any endpoint logic runs.  A
//! request without a context is handled as `NoCertificatePresented`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::authz::{AuthFailureReason, AuthorizationContext, PeerCertificate};

/// Message carried by every rejection.
pub const REJECTION_MESSAGE: &str = "Client certificate validation failed";

/// Named endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/`: identity echo.
    Root,
    /// `/api/secure-data`: protected catalog.
    SecureData,
    /// `/api/status`: health and uptime.
    Status,
    /// Any other path.
    Unknown,
}

impl Endpoint {
    /// Exact-match routing; query strings are not part of `path`.
    #[must_use]
    pub fn resolve(path: &str) -> Self {
        match path {
            "/" => Self::Root,
            "/api/secure-data" => Self::SecureData,
            "/api/status" => Self::Status,
            _ => Self::Unknown,
        }
    }
}

/// Status and JSON body of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON body.
    pub body: Value,
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Routes requests to endpoints.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    started: Instant,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create a dispatcher; uptime counts from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Handle one request.
    #[must_use]
    pub fn dispatch(&self, context: Option<&AuthorizationContext>, path: &str) -> DispatchResponse {
        let peer = match context {
            Some(ctx) => match ctx.peer_identity() {
                Some(peer) => peer,
                None => {
                    let reason = ctx
                        .failure_reason()
                        .unwrap_or(AuthFailureReason::ChainValidationFailed);
                    return reject(reason, path);
                }
            },
            None => return reject(AuthFailureReason::NoCertificatePresented, path),
        };

        info!(peer = %peer.display_name(), path, "Authenticated request");

        let mut body = match Endpoint::resolve(path) {
            Endpoint::Root => json!({
                "success": true,
                "message": format!(
                    "Hello, {}! Your certificate was verified successfully.",
                    peer.display_name()
                ),
                "endpoint": "root",
                "clientDetails": {
                    "subject": peer.subject(),
                    "issuer": peer.issuer(),
                    "validFrom": peer.summary.valid_from,
                    "validTo": peer.summary.valid_to,
                    "serialNumber": peer.summary.serial_number,
                },
            }),
            Endpoint::SecureData => json!({
                "success": true,
                "message": "You have access to the secure data API",
                "endpoint": "secure-data",
                "secureData": {
                    "items": [
                        { "id": 1, "name": "Protected Resource 1" },
                        { "id": 2, "name": "Protected Resource 2" },
                        { "id": 3, "name": "Protected Resource 3" },
                    ],
                },
            }),
            Endpoint::Status => json!({
                "success": true,
                "message": "Server status is healthy",
                "endpoint": "status",
                "serverTime": Utc::now(),
                "uptime": self.started.elapsed().as_secs_f64(),
            }),
            Endpoint::Unknown => json!({
                "success": true,
                "message": "Unknown endpoint requested",
                "endpoint": path,
            }),
        };

        if let Some(obj) = body.as_object_mut() {
            obj.insert("peer".to_owned(), peer_summary(peer));
        }

        DispatchResponse {
            status: StatusCode::OK,
            body,
        }
    }

    /// Wrap the dispatcher in an axum router.
    ///
    /// Every path and method lands on the dispatcher.  The connection layer
    /// supplies the context as an `Arc<AuthorizationContext>` request
    /// extension.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(dispatch_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self))
    }
}

fn reject(reason: AuthFailureReason, path: &str) -> DispatchResponse {
    warn!(%reason, path, "Unauthorized request");
    DispatchResponse {
        status: StatusCode::UNAUTHORIZED,
        body: json!({
            "success": false,
            "message": REJECTION_MESSAGE,
            "reason": reason,
            "endpoint": path,
        }),
    }
}

fn peer_summary(peer: &PeerCertificate) -> Value {
    json!({
        "subject": peer.subject(),
        "issuer": peer.issuer(),
    })
}

async fn dispatch_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    context: Option<Extension<Arc<AuthorizationContext>>>,
    uri: Uri,
) -> DispatchResponse {
    dispatcher.dispatch(context.as_ref().map(|ext| ext.0.as_ref()), uri.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use rcgen::{CertificateParams, DnType, KeyPair};
    use tower::ServiceExt;

    fn authenticated(cn: &str) -> AuthorizationContext {
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, cn);
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Acme");
        let key = KeyPair::generate().unwrap();
        let der = params.self_signed(&key).unwrap().der().to_vec();
        let peer = PeerCertificate::from_verified_der(&der).unwrap();
        AuthorizationContext::authenticated(None, peer)
    }

    #[test]
    fn resolve_is_exact_match() {
        assert_eq!(Endpoint::resolve("/"), Endpoint::Root);
        assert_eq!(Endpoint::resolve("/api/status"), Endpoint::Status);
        assert_eq!(Endpoint::resolve("/api/status/"), Endpoint::Unknown);
        assert_eq!(Endpoint::resolve("/API/STATUS"), Endpoint::Unknown);
    }

    #[test]
    fn root_echoes_peer_identity() {
        // GIVEN: an authenticated client1
        let ctx = authenticated("client1");

        // WHEN: dispatch "/"
        let resp = Dispatcher::new().dispatch(Some(&ctx), "/");

        // THEN: 200 with the exact subject DN
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body["endpoint"], "root");
        assert_eq!(resp.body["clientDetails"]["subject"]["CN"], "client1");
        assert_eq!(resp.body["clientDetails"]["subject"]["O"], "Acme");
        assert_eq!(
            resp.body["message"],
            "Hello, client1! Your certificate was verified successfully."
        );
    }

    #[test]
    fn every_authenticated_response_carries_peer() {
        let ctx = authenticated("client2");
        let dispatcher = Dispatcher::new();
        for path in ["/", "/api/secure-data", "/api/status", "/foo/bar"] {
            let resp = dispatcher.dispatch(Some(&ctx), path);
            assert_eq!(resp.body["peer"]["subject"]["CN"], "client2", "{path}");
            assert_eq!(resp.body["success"], true, "{path}");
        }
    }

    #[test]
    fn secure_data_lists_three_items() {
        let resp = Dispatcher::new().dispatch(Some(&authenticated("client1")), "/api/secure-data");
        let items = resp.body["secureData"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["name"], "Protected Resource 1");
    }

    #[test]
    fn status_reports_uptime_and_time() {
        let resp = Dispatcher::new().dispatch(Some(&authenticated("client1")), "/api/status");
        assert_eq!(resp.body["message"], "Server status is healthy");
        assert!(resp.body["uptime"].as_f64().unwrap() >= 0.0);
        assert!(resp.body["serverTime"].is_string());
    }

    #[test]
    fn unknown_path_is_acknowledged() {
        // GIVEN/WHEN: an authenticated request for an unmatched path
        let resp = Dispatcher::new().dispatch(Some(&authenticated("client1")), "/foo/bar");

        // THEN: generic 200 acknowledgment echoing the path
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body["message"], "Unknown endpoint requested");
        assert_eq!(resp.body["endpoint"], "/foo/bar");
    }

    #[test]
    fn rejected_context_gets_uniform_401() {
        // GIVEN: a rejected context
        let ctx = AuthorizationContext::rejected(None, AuthFailureReason::CertificateExpired);

        // WHEN: dispatching a protected path
        let resp = Dispatcher::new().dispatch(Some(&ctx), "/api/secure-data");

        // THEN: 401, no endpoint data
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.body,
            json!({
                "success": false,
                "message": REJECTION_MESSAGE,
                "reason": "CertificateExpired",
                "endpoint": "/api/secure-data",
            })
        );
    }

    #[test]
    fn missing_context_fails_closed() {
        let resp = Dispatcher::new().dispatch(None, "/");
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(resp.body["reason"], "NoCertificatePresented");
    }

    #[tokio::test]
    async fn router_reads_context_from_request_extension() {
        // GIVEN: a router and a request carrying an authenticated context
        let router = Dispatcher::new().into_router();
        let req = Request::builder()
            .uri("/?verbose=1")
            .extension(Arc::new(authenticated("client1")))
            .body(Body::empty())
            .unwrap();

        // WHEN
        let resp = router.oneshot(req).await.unwrap();

        // THEN: query string ignored for routing
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["endpoint"], "root");
    }

    #[tokio::test]
    async fn unknown_endpoint_echo_omits_query_string() {
        let router = Dispatcher::new().into_router();
        let req = Request::builder()
            .uri("/foo/bar?token=secret")
            .extension(Arc::new(authenticated("client1")))
            .body(Body::empty())
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Unknown endpoint requested");
        assert_eq!(json["endpoint"], "/foo/bar");
    }

    #[tokio::test]
    async fn router_without_context_returns_401() {
        let router = Dispatcher::new().into_router();
        let req = Request::builder()
            .method("POST")
            .uri("/api/secure-data")
            .body(Body::empty())
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
