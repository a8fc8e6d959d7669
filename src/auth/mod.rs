//! OAuth 2.0 issuer, upstream provider adapters, and request admission.
//!
//! [`service::AuthService`] owns the `/register`, `/authorize`, callback, and
//! `/token` HTTP surface plus `verify_token` (admission); [`session_manager`]
//! owns the `TokenStore`-backed lifecycle operations it's built on;
//! [`provider`] adapts upstream identity providers; [`middleware`] extracts
//! the caller's [`crate::model::UserContext`] from a bearer token for
//! non-`AuthService` routes (the MCP transport, admin surface).

pub mod middleware;
pub mod pkce;
pub mod provider;
pub mod service;
pub mod session_manager;

pub use middleware::AuthExtractor;
pub use provider::{GenericOAuthProvider, ProviderAdapter, ProviderConfig, RawProviderGrant};
pub use service::AuthService;
pub use session_manager::SessionManager;
