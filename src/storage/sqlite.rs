//! SQLite-backed `TokenStore`.
//!
//! Composite fields (`redirect_uris`, `provider_grant`, `user`) are stored as
//! JSON text columns via [`sql_common`]. One-time-use consumption
//! (`consume_state`, `consume_authorization_code`) is a single `DELETE ...
//! RETURNING *` statement — atomic under SQLite's own locking, so a replayed
//! state or code can never be consumed twice even under concurrent requests.

use crate::error::{GatewayError, Result, StorageError};
use crate::model::{AuthorizationCode, RegisteredClient, Session, StateRecord};
use crate::storage::sql_common::{from_json_str, to_json_string};
use crate::storage::TokenStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::path::Path;

pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    /// `dsn` is a bare filesystem path (or `:memory:`); the `sqlite:` prefix
    /// and `mode=rwc` are applied here so callers can pass a plain path.
    pub async fn new(dsn: &str) -> Result<Self> {
        let connection_string = if dsn.starts_with("sqlite:") {
            if dsn.contains('?') {
                dsn.to_string()
            } else {
                format!("{dsn}?mode=rwc")
            }
        } else {
            format!("sqlite:{dsn}?mode=rwc")
        };

        let file_path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);
        if file_path.contains("..") {
            return Err(GatewayError::config(
                "database path cannot contain '..' (path traversal not allowed)",
            ));
        }
        if file_path != ":memory:"
            && let Some(parent) = Path::new(file_path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect(&connection_string)
            .await
            .map_err(|e| GatewayError::storage(format!("failed to connect to sqlite: {e}")))?;

        for pragma in [
            "PRAGMA journal_mode = WAL",
            "PRAGMA synchronous = NORMAL",
            "PRAGMA busy_timeout = 5000",
            "PRAGMA foreign_keys = ON",
        ] {
            sqlx::query(pragma).execute(&pool).await?;
        }

        sqlx::migrate!("migrations/sqlite")
            .run(&pool)
            .await
            .map_err(|e| GatewayError::storage(format!("failed to run migrations: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    fn parse_client(row: &SqliteRow) -> Result<RegisteredClient> {
        Ok(RegisteredClient {
            client_id: row.try_get("client_id")?,
            client_secret: row.try_get("client_secret")?,
            client_name: row.try_get("client_name")?,
            redirect_uris: from_json_str(&row.try_get::<String, _>("redirect_uris")?)?,
            grant_types: from_json_str(&row.try_get::<String, _>("grant_types")?)?,
            scope: row.try_get("scope")?,
            created_at: parse_ts(row.try_get("created_at")?)?,
        })
    }

    fn parse_state(row: &SqliteRow) -> Result<StateRecord> {
        Ok(StateRecord {
            state_id: row.try_get("state_id")?,
            client_id: row.try_get("client_id")?,
            client_redirect_uri: row.try_get("client_redirect_uri")?,
            downstream_pkce_challenge: row.try_get("downstream_pkce_challenge")?,
            downstream_pkce_method: row.try_get("downstream_pkce_method")?,
            upstream_pkce_verifier: row.try_get("upstream_pkce_verifier")?,
            client_state: row.try_get("client_state")?,
            issued_at: parse_ts(row.try_get("issued_at")?)?,
            expires_at: parse_ts(row.try_get("expires_at")?)?,
        })
    }

    fn parse_code(row: &SqliteRow) -> Result<AuthorizationCode> {
        Ok(AuthorizationCode {
            code: row.try_get("code")?,
            session_id: row.try_get("session_id")?,
            client_id: row.try_get("client_id")?,
            redirect_uri: row.try_get("redirect_uri")?,
            code_challenge: row.try_get("code_challenge")?,
            code_challenge_method: row.try_get("code_challenge_method")?,
            issued_at: parse_ts(row.try_get("issued_at")?)?,
            expires_at: parse_ts(row.try_get("expires_at")?)?,
        })
    }

    fn parse_session(row: &SqliteRow) -> Result<Session> {
        Ok(Session {
            session_id: row.try_get("session_id")?,
            access_token_hash: row.try_get("access_token_hash")?,
            refresh_token_hash: row.try_get("refresh_token_hash")?,
            provider_grant: from_json_str(&row.try_get::<String, _>("provider_grant")?)?,
            user: from_json_str(&row.try_get::<String, _>("user_context")?)?,
            created_at: parse_ts(row.try_get("created_at")?)?,
            expires_at: parse_ts(row.try_get("expires_at")?)?,
        })
    }
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GatewayError::internal(format!("bad timestamp column: {e}")))
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn save_client(&self, client: &RegisteredClient) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO registered_clients \
             (client_id, client_secret, client_name, redirect_uris, grant_types, scope, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.client_name)
        .bind(to_json_string(&client.redirect_uris)?)
        .bind(to_json_string(&client.grant_types)?)
        .bind(&client.scope)
        .bind(client.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        let row = sqlx::query("SELECT * FROM registered_clients WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_client).transpose()
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM registered_clients WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn save_state(&self, state: &StateRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO state_records \
             (state_id, client_id, client_redirect_uri, downstream_pkce_challenge, \
              downstream_pkce_method, upstream_pkce_verifier, client_state, issued_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.state_id)
        .bind(&state.client_id)
        .bind(&state.client_redirect_uri)
        .bind(&state.downstream_pkce_challenge)
        .bind(&state.downstream_pkce_method)
        .bind(&state.upstream_pkce_verifier)
        .bind(&state.client_state)
        .bind(state.issued_at.to_rfc3339())
        .bind(state.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn consume_state(&self, state_id: &str) -> Result<Option<StateRecord>> {
        let row = sqlx::query("DELETE FROM state_records WHERE state_id = ? RETURNING *")
            .bind(state_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_state).transpose()
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO authorization_codes \
             (code, session_id, client_id, redirect_uri, code_challenge, code_challenge_method, \
              issued_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code.code)
        .bind(&code.session_id)
        .bind(&code.client_id)
        .bind(&code.redirect_uri)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(code.issued_at.to_rfc3339())
        .bind(code.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn consume_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let row = sqlx::query("DELETE FROM authorization_codes WHERE code = ? RETURNING *")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_code).transpose()
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sessions \
             (session_id, access_token_hash, refresh_token_hash, provider_grant, user_context, \
              created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.session_id)
        .bind(&session.access_token_hash)
        .bind(&session.refresh_token_hash)
        .bind(to_json_string(&session.provider_grant)?)
        .bind(to_json_string(&session.user)?)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_session).transpose()
    }

    async fn get_session_by_access_hash(&self, access_token_hash: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE access_token_hash = ?")
            .bind(access_token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_session).transpose()
    }

    async fn get_session_by_refresh_hash(&self, refresh_token_hash: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE refresh_token_hash = ?")
            .bind(refresh_token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_session).transpose()
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        self.save_session(session).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        rows.iter().map(Self::parse_session).collect()
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let mut total = 0u64;
        for table in ["state_records", "authorization_codes", "sessions"] {
            let sql = format!("DELETE FROM {table} WHERE expires_at < ?");
            let result = sqlx::query(&sql)
                .bind(&now)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;
            total += result.rows_affected();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SqliteTokenStore {
        SqliteTokenStore::new_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn consume_state_is_one_time() {
        let store = store().await;
        let state = StateRecord {
            state_id: "s1".into(),
            client_id: "c1".into(),
            client_redirect_uri: "https://client/cb".into(),
            downstream_pkce_challenge: None,
            downstream_pkce_method: None,
            upstream_pkce_verifier: Some("v".into()),
            client_state: Some("xyz".into()),
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(10),
        };
        store.save_state(&state).await.unwrap();
        let consumed = store.consume_state("s1").await.unwrap();
        assert!(consumed.is_some());
        assert!(store.consume_state("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn consume_authorization_code_is_one_time() {
        let store = store().await;
        let code = AuthorizationCode {
            code: "code1".into(),
            session_id: "sess1".into(),
            client_id: "c1".into(),
            redirect_uri: "https://client/cb".into(),
            code_challenge: None,
            code_challenge_method: None,
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::minutes(5),
        };
        store.save_authorization_code(&code).await.unwrap();
        assert!(store.consume_authorization_code("code1").await.unwrap().is_some());
        assert!(store.consume_authorization_code("code1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_expired_sweeps_all_three_tables() {
        let store = store().await;
        let expired_state = StateRecord {
            state_id: "exp".into(),
            client_id: "c1".into(),
            client_redirect_uri: "https://client/cb".into(),
            downstream_pkce_challenge: None,
            downstream_pkce_method: None,
            upstream_pkce_verifier: None,
            client_state: None,
            issued_at: Utc::now() - Duration::hours(1),
            expires_at: Utc::now() - Duration::minutes(1),
        };
        store.save_state(&expired_state).await.unwrap();
        let deleted = store.delete_expired().await.unwrap();
        assert_eq!(deleted, 1);
    }
}
