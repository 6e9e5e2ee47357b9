//! Authorization context derived from the mTLS handshake.
//!
//! ```text
//! TLS accept ─┬─ Ok  → PeerCertificate::from_verified_der ─→ Authenticated{peer}
//!             └─ Err → classify_handshake_error            ─→ Rejected{reason}
//! ```

pub mod classify;
pub mod context;
pub mod peer;

pub use classify::{classify_handshake_error, classify_tls_error};
pub use context::{AuthFailureReason, AuthorizationContext, AuthorizationResult};
pub use peer::PeerCertificate;
