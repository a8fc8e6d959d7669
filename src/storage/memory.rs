//! In-memory `TokenStore`, for tests and single-process development.
//!
//! Uses `DashMap` for lock-free concurrent access. `consume_state`/
//! `consume_authorization_code` use `DashMap::remove`, which is atomic
//! per-entry — sufficient for the one-time-use invariant within a single
//! process, though not across processes; this backend is not meant for
//! multi-instance deployment.

use crate::error::Result;
use crate::model::{AuthorizationCode, RegisteredClient, Session, StateRecord};
use crate::storage::TokenStore;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryTokenStore {
    clients: DashMap<String, RegisteredClient>,
    states: DashMap<String, StateRecord>,
    codes: DashMap<String, AuthorizationCode>,
    sessions_by_id: DashMap<String, Session>,
    access_index: DashMap<String, String>,
    refresh_index: DashMap<String, String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save_client(&self, client: &RegisteredClient) -> Result<()> {
        self.clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        Ok(self.clients.get(client_id).map(|r| r.clone()))
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        self.clients.remove(client_id);
        Ok(())
    }

    async fn save_state(&self, state: &StateRecord) -> Result<()> {
        self.states.insert(state.state_id.clone(), state.clone());
        Ok(())
    }

    async fn consume_state(&self, state_id: &str) -> Result<Option<StateRecord>> {
        Ok(self.states.remove(state_id).map(|(_, v)| v))
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> Result<()> {
        self.codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn consume_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self.codes.remove(code).map(|(_, v)| v))
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.access_index
            .insert(session.access_token_hash.clone(), session.session_id.clone());
        self.refresh_index
            .insert(session.refresh_token_hash.clone(), session.session_id.clone());
        self.sessions_by_id.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions_by_id.get(session_id).map(|r| r.clone()))
    }

    async fn get_session_by_access_hash(&self, access_token_hash: &str) -> Result<Option<Session>> {
        let Some(session_id) = self.access_index.get(access_token_hash).map(|r| r.clone()) else {
            return Ok(None);
        };
        Ok(self.sessions_by_id.get(&session_id).map(|r| r.clone()))
    }

    async fn get_session_by_refresh_hash(&self, refresh_token_hash: &str) -> Result<Option<Session>> {
        let Some(session_id) = self.refresh_index.get(refresh_token_hash).map(|r| r.clone()) else {
            return Ok(None);
        };
        Ok(self.sessions_by_id.get(&session_id).map(|r| r.clone()))
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        // A rotated refresh/access hash may replace the old index entries;
        // stale ones are left in place but will never resolve since the
        // session they'd point to was overwritten by id, not appended.
        self.save_session(session).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        if let Some((_, session)) = self.sessions_by_id.remove(session_id) {
            self.access_index.remove(&session.access_token_hash);
            self.refresh_index.remove(&session.refresh_token_hash);
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.sessions_by_id.iter().map(|r| r.value().clone()).collect())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut count = 0u64;

        let expired_states: Vec<String> = self
            .states
            .iter()
            .filter(|r| r.value().expires_at < now)
            .map(|r| r.key().clone())
            .collect();
        for id in expired_states {
            self.states.remove(&id);
            count += 1;
        }

        let expired_codes: Vec<String> = self
            .codes
            .iter()
            .filter(|r| r.value().expires_at < now)
            .map(|r| r.key().clone())
            .collect();
        for id in expired_codes {
            self.codes.remove(&id);
            count += 1;
        }

        let expired_sessions: Vec<String> = self
            .sessions_by_id
            .iter()
            .filter(|r| r.value().expires_at < now)
            .map(|r| r.key().clone())
            .collect();
        for id in expired_sessions {
            self.delete_session(&id).await?;
            count += 1;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_state(id: &str) -> StateRecord {
        StateRecord {
            state_id: id.to_string(),
            client_id: "c1".into(),
            client_redirect_uri: "https://client/cb".into(),
            downstream_pkce_challenge: None,
            downstream_pkce_method: None,
            upstream_pkce_verifier: None,
            client_state: None,
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn state_is_consumed_exactly_once() {
        let store = MemoryTokenStore::new();
        store.save_state(&sample_state("s1")).await.unwrap();
        assert!(store.consume_state("s1").await.unwrap().is_some());
        assert!(store.consume_state("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_state_consume_returns_none() {
        let store = MemoryTokenStore::new();
        assert!(store.consume_state("nope").await.unwrap().is_none());
    }
}
