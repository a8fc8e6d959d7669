//! PostgreSQL-backed `TokenStore`. Composite fields use native `JSONB`
//! columns via `sqlx::types::Json` rather than the SQLite backend's text
//! columns.

use crate::error::{GatewayError, Result, StorageError};
use crate::model::{AuthorizationCode, RegisteredClient, Session, StateRecord};
use crate::storage::TokenStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};

pub struct PostgresTokenStore {
    pool: PgPool,
}

impl PostgresTokenStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| GatewayError::storage(format!("failed to connect to postgres: {e}")))?;

        sqlx::migrate!("migrations/postgres")
            .run(&pool)
            .await
            .map_err(|e| GatewayError::storage(format!("failed to run migrations: {e}")))?;

        Ok(Self { pool })
    }

    fn parse_client(row: &PgRow) -> Result<RegisteredClient> {
        Ok(RegisteredClient {
            client_id: row.try_get("client_id")?,
            client_secret: row.try_get("client_secret")?,
            client_name: row.try_get("client_name")?,
            redirect_uris: row.try_get::<Json<Vec<String>>, _>("redirect_uris")?.0,
            grant_types: row.try_get::<Json<Vec<String>>, _>("grant_types")?.0,
            scope: row.try_get("scope")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn parse_state(row: &PgRow) -> Result<StateRecord> {
        Ok(StateRecord {
            state_id: row.try_get("state_id")?,
            client_id: row.try_get("client_id")?,
            client_redirect_uri: row.try_get("client_redirect_uri")?,
            downstream_pkce_challenge: row.try_get("downstream_pkce_challenge")?,
            downstream_pkce_method: row.try_get("downstream_pkce_method")?,
            upstream_pkce_verifier: row.try_get("upstream_pkce_verifier")?,
            client_state: row.try_get("client_state")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn parse_code(row: &PgRow) -> Result<AuthorizationCode> {
        Ok(AuthorizationCode {
            code: row.try_get("code")?,
            session_id: row.try_get("session_id")?,
            client_id: row.try_get("client_id")?,
            redirect_uri: row.try_get("redirect_uri")?,
            code_challenge: row.try_get("code_challenge")?,
            code_challenge_method: row.try_get("code_challenge_method")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn parse_session(row: &PgRow) -> Result<Session> {
        Ok(Session {
            session_id: row.try_get("session_id")?,
            access_token_hash: row.try_get("access_token_hash")?,
            refresh_token_hash: row.try_get("refresh_token_hash")?,
            provider_grant: row.try_get::<Json<_>, _>("provider_grant")?.0,
            user: row.try_get::<Json<_>, _>("user_context")?.0,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn save_client(&self, client: &RegisteredClient) -> Result<()> {
        sqlx::query(
            "INSERT INTO registered_clients \
             (client_id, client_secret, client_name, redirect_uris, grant_types, scope, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (client_id) DO UPDATE SET \
             client_secret = excluded.client_secret, client_name = excluded.client_name, \
             redirect_uris = excluded.redirect_uris, grant_types = excluded.grant_types, \
             scope = excluded.scope",
        )
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.client_name)
        .bind(Json(&client.redirect_uris))
        .bind(Json(&client.grant_types))
        .bind(&client.scope)
        .bind(client.created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        let row = sqlx::query("SELECT * FROM registered_clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_client).transpose()
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM registered_clients WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn save_state(&self, state: &StateRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO state_records \
             (state_id, client_id, client_redirect_uri, downstream_pkce_challenge, \
              downstream_pkce_method, upstream_pkce_verifier, client_state, issued_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (state_id) DO NOTHING",
        )
        .bind(&state.state_id)
        .bind(&state.client_id)
        .bind(&state.client_redirect_uri)
        .bind(&state.downstream_pkce_challenge)
        .bind(&state.downstream_pkce_method)
        .bind(&state.upstream_pkce_verifier)
        .bind(&state.client_state)
        .bind(state.issued_at)
        .bind(state.expires_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn consume_state(&self, state_id: &str) -> Result<Option<StateRecord>> {
        let row = sqlx::query("DELETE FROM state_records WHERE state_id = $1 RETURNING *")
            .bind(state_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_state).transpose()
    }

    async fn save_authorization_code(&self, code: &AuthorizationCode) -> Result<()> {
        sqlx::query(
            "INSERT INTO authorization_codes \
             (code, session_id, client_id, redirect_uri, code_challenge, code_challenge_method, \
              issued_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(&code.code)
        .bind(&code.session_id)
        .bind(&code.client_id)
        .bind(&code.redirect_uri)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(code.issued_at)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn consume_authorization_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        let row = sqlx::query("DELETE FROM authorization_codes WHERE code = $1 RETURNING *")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_code).transpose()
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions \
             (session_id, access_token_hash, refresh_token_hash, provider_grant, user_context, \
              created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (session_id) DO UPDATE SET \
             access_token_hash = excluded.access_token_hash, \
             refresh_token_hash = excluded.refresh_token_hash, \
             provider_grant = excluded.provider_grant, expires_at = excluded.expires_at",
        )
        .bind(&session.session_id)
        .bind(&session.access_token_hash)
        .bind(&session.refresh_token_hash)
        .bind(Json(&session.provider_grant))
        .bind(Json(&session.user))
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_session).transpose()
    }

    async fn get_session_by_access_hash(&self, access_token_hash: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE access_token_hash = $1")
            .bind(access_token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        row.as_ref().map(Self::parse_session).transpose()
    }

    async fn get_session_by_refresh_hash(&self, refresh_token_hash: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE refresh_token_hash = $1")
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
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
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
        let now: DateTime<Utc> = Utc::now();
        let mut total = 0u64;
        for table in ["state_records", "authorization_codes", "sessions"] {
            let sql = format!("DELETE FROM {table} WHERE expires_at < $1");
            let result = sqlx::query(&sql)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(StorageError::from)?;
            total += result.rows_affected();
        }
        Ok(total)
    }
}
