//! HTTP middleware for client identity and session enforcement.
//!
//! - **Client IP**: Prioritized proxy header resolution for rate limit keys
//! - **Session Guard**: Blacklist-then-signature check on protected routes
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Trace → Hardening headers → Session Guard → Handler
//!                                                        ↓
//!                                             303 to sign-in if refused
//! ```
//!
//! Rate limiting and CSRF checks are not layers: they depend on the action
//! and the form body, so handlers invoke them through
//! [`RequestGate`](crate::gate::RequestGate).

pub mod ip;
pub mod session;

pub use ip::{ClientIpResolver, DEFAULT_CLIENT_IP_HEADERS, LOOPBACK_PLACEHOLDER};
pub use session::{
    AuthenticatedUser, ProtectedRoutes, RoutePattern, SessionGuard, extract_session_token,
};
