//! Persistence for the gateway's OAuth issuer state: registered clients,
//! one-time state/code records, and sessions.
//!
//! `TokenStore` is backend-agnostic; `memory`, `sqlite`, and `postgres` each
//! implement it. The one-time-use consume methods (`consume_state`,
//! `consume_authorization_code`) are the trait's load-bearing invariant:
//! each must atomically read-and-delete so a replayed state or code is
//! rejected even under concurrent requests, and duplicate consumption never
//! succeeds twice.

pub mod memory;
pub mod postgres;
mod sql_common;
pub mod sqlite;

use crate::error::Result;
use crate::model::{AuthorizationCode, RegisteredClient, Session, StateRecord};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait TokenStore: Send + Sync {
    // Registered clients
    async fn save_client(&self, client: &RegisteredClient) -> Result<()>;
    async fn get_client(&self, client_id: &str) -> Result<Option<RegisteredClient>>;
    async fn delete_client(&self, client_id: &str) -> Result<()>;

    // Authorize-leg state
    async fn save_state(&self, state: &StateRecord) -> Result<()>;
    /// Atomically fetch and delete. Returns `None` if the state was never
    /// issued, already consumed, or (backend-dependent) expired.
    async fn consume_state(&self, state_id: &str) -> Result<Option<StateRecord>>;

    // Authorization codes
    async fn save_authorization_code(&self, code: &AuthorizationCode) -> Result<()>;
    /// Atomically fetch and delete, mirroring `consume_state`.
    async fn consume_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    // Sessions
    async fn save_session(&self, session: &Session) -> Result<()>;
    /// Looked up by the authorization-code→session binding at `/token` time,
    /// before any bearer token exists for the session.
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    async fn get_session_by_access_hash(&self, access_token_hash: &str) -> Result<Option<Session>>;
    async fn get_session_by_refresh_hash(&self, refresh_token_hash: &str) -> Result<Option<Session>>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    async fn delete_session(&self, session_id: &str) -> Result<()>;
    /// All live sessions, for the admin interface's `GET /auth/sessions`.
    /// Not used in the request path.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Sweep expired state records, codes, and sessions. Run periodically by
    /// a background task, not on every request.
    async fn delete_expired(&self) -> Result<u64>;
}

/// Construct a `TokenStore` from the gateway's storage configuration;
/// the backend is operator-selected, not fixed at compile time.
pub async fn create_token_store(config: &crate::config::StorageConfig) -> Result<Arc<dyn TokenStore>> {
    match config.driver.as_str() {
        crate::constants::STORAGE_DRIVER_MEMORY => Ok(Arc::new(memory::MemoryTokenStore::new())),
        crate::constants::STORAGE_DRIVER_SQLITE => Ok(Arc::new(sqlite::SqliteTokenStore::new(&config.dsn).await?)),
        crate::constants::STORAGE_DRIVER_POSTGRES => {
            Ok(Arc::new(postgres::PostgresTokenStore::new(&config.dsn).await?))
        }
        other => Err(crate::error::GatewayError::config(format!(
            "unknown storage driver '{other}'; supported: memory, sqlite, postgres"
        ))),
    }
}
