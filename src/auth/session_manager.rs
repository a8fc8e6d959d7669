//! `SessionManager`: lifecycle operations over `TokenStore`.
//!
//! Owns the one-time-use state/code invariants and the opaque-token
//! issuance idioms: `rand`-backed token generation, SHA-256 hashing before
//! storage, and provider-token refresh with a skew buffer.

use crate::auth::pkce;
use crate::auth::provider::{ProviderAdapter, RawProviderGrant};
use crate::crypto::TokenCipher;
use crate::error::{GatewayError, Result};
use crate::model::{AuthorizationCode, ProviderGrant, Session, StateRecord, UserContext};
use crate::storage::TokenStore;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    cipher: TokenCipher,
    state_ttl: Duration,
    code_ttl: Duration,
    access_ttl: Duration,
    refresh_ttl: Duration,
    refresh_skew: Duration,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>, cipher: TokenCipher, oauth: &crate::config::OAuthConfig) -> Self {
        Self {
            store,
            cipher,
            state_ttl: Duration::seconds(oauth.state_ttl_secs),
            code_ttl: Duration::seconds(oauth.code_ttl_secs),
            access_ttl: Duration::seconds(oauth.access_ttl_secs),
            refresh_ttl: Duration::seconds(oauth.refresh_ttl_secs),
            refresh_skew: Duration::seconds(oauth.refresh_skew_secs),
        }
    }

    /// Generates its own upstream PKCE pair when the caller requests one,
    /// independent of whatever PKCE the client used on the downstream leg.
    pub async fn create_state(
        &self,
        client_id: &str,
        client_redirect_uri: &str,
        downstream_pkce_challenge: Option<String>,
        downstream_pkce_method: Option<String>,
        generate_upstream_pkce: bool,
        client_state: Option<String>,
    ) -> Result<(StateRecord, Option<String>)> {
        let upstream_verifier = generate_upstream_pkce.then(pkce::generate_verifier);

        let record = StateRecord {
            state_id: crate::model::new_uuid_v4().to_string(),
            client_id: client_id.to_string(),
            client_redirect_uri: client_redirect_uri.to_string(),
            downstream_pkce_challenge,
            downstream_pkce_method,
            upstream_pkce_verifier: upstream_verifier.clone(),
            client_state,
            issued_at: Utc::now(),
            expires_at: Utc::now() + self.state_ttl,
        };

        self.store.save_state(&record).await?;
        Ok((record, upstream_verifier))
    }

    /// Deletes atomically, fails on miss or expiry.
    pub async fn consume_state(&self, state_id: &str) -> Result<StateRecord> {
        let record = self
            .store
            .consume_state(state_id)
            .await?
            .ok_or_else(|| GatewayError::invalid_state("state not found, already consumed, or unknown"))?;

        if record.is_expired() {
            return Err(GatewayError::invalid_state("state expired"));
        }

        Ok(record)
    }

    /// Returns `(Session, plaintext_access, plaintext_refresh)`; the
    /// plaintext pair is never persisted.
    pub async fn issue_session(&self, user: UserContext, grant: RawProviderGrant) -> Result<(Session, String, String)> {
        let access_plain = random_token();
        let refresh_plain = random_token();

        let provider_grant = ProviderGrant {
            access_token_encrypted: self.cipher.encrypt(&grant.access_token)?,
            refresh_token_encrypted: grant
                .refresh_token
                .as_deref()
                .map(|t| self.cipher.encrypt(t))
                .transpose()?,
            expires_at: grant.expires_at,
            granted_scopes: grant.granted_scopes,
        };

        let session = Session {
            session_id: crate::model::new_uuid_v4().to_string(),
            access_token_hash: hash_token(&access_plain),
            refresh_token_hash: hash_token(&refresh_plain),
            provider_grant,
            user,
            created_at: Utc::now(),
            expires_at: Utc::now() + self.refresh_ttl,
        };

        self.store.save_session(&session).await?;
        Ok((session, access_plain, refresh_plain))
    }

    pub async fn issue_authorization_code(
        &self,
        session_id: &str,
        client_id: &str,
        redirect_uri: &str,
        downstream_pkce_challenge: Option<String>,
        downstream_pkce_method: Option<String>,
    ) -> Result<String> {
        let code = random_token();
        let record = AuthorizationCode {
            code: code.clone(),
            session_id: session_id.to_string(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            code_challenge: downstream_pkce_challenge,
            code_challenge_method: downstream_pkce_method,
            issued_at: Utc::now(),
            expires_at: Utc::now() + self.code_ttl,
        };

        self.store.save_authorization_code(&record).await?;
        Ok(code)
    }

    /// Binding + PKCE checks, then atomic delete. Returns the bound session
    /// id.
    pub async fn consume_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<String> {
        let record = self
            .store
            .consume_authorization_code(code)
            .await?
            .ok_or_else(|| GatewayError::invalid_grant("authorization code not found or already used"))?;

        if record.is_expired() {
            return Err(GatewayError::invalid_grant("authorization code expired"));
        }
        if !record.matches_binding(client_id, redirect_uri) {
            return Err(GatewayError::invalid_grant("client_id/redirect_uri mismatch"));
        }

        if let Some(challenge) = &record.code_challenge {
            let method = record.code_challenge_method.as_deref().unwrap_or(pkce::METHOD_S256);
            let verifier = code_verifier.ok_or_else(|| GatewayError::invalid_grant("missing code_verifier"))?;
            if !pkce::verify(verifier, challenge, method) {
                return Err(GatewayError::invalid_grant("PKCE verification failed"));
            }
        }

        Ok(record.session_id)
    }

    pub async fn lookup_session_by_access_token(&self, bearer: &str) -> Result<Session> {
        let hash = hash_token(bearer);
        let session = self
            .store
            .get_session_by_access_hash(&hash)
            .await?
            .ok_or_else(|| GatewayError::unauthorized("unknown or revoked access token"))?;

        if session.is_expired() {
            return Err(GatewayError::unauthorized("session expired"));
        }

        Ok(session)
    }

    /// Returns the (possibly updated) session; persists the refreshed grant
    /// atomically.
    pub async fn refresh_provider_if_needed(
        &self,
        mut session: Session,
        adapter: &dyn ProviderAdapter,
    ) -> Result<Session> {
        if !session.provider_needs_refresh(self.refresh_skew) {
            return Ok(session);
        }

        let refresh_plain = session
            .provider_grant
            .refresh_token_encrypted
            .as_deref()
            .map(|blob| self.cipher.decrypt(blob))
            .transpose()?
            .ok_or_else(|| GatewayError::unauthorized("provider token expired and no refresh token is available"))?;

        let refreshed = adapter.refresh_token(&refresh_plain).await?;

        session.provider_grant.access_token_encrypted = self.cipher.encrypt(&refreshed.access_token)?;
        if let Some(new_refresh) = &refreshed.refresh_token {
            session.provider_grant.refresh_token_encrypted = Some(self.cipher.encrypt(new_refresh)?);
        }
        session.provider_grant.expires_at = refreshed.expires_at;
        session.provider_grant.granted_scopes = refreshed.granted_scopes;

        self.store.update_session(&session).await?;
        Ok(session)
    }

    /// Decrypt the provider access token currently held by `session`, after
    /// any necessary refresh has already run.
    pub fn decrypt_provider_access_token(&self, session: &Session) -> Result<String> {
        self.cipher.decrypt(&session.provider_grant.access_token_encrypted)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.store.delete_session(session_id).await
    }

    /// Bulk-deletes expired states, codes, and sessions; safe to run
    /// concurrently with serving.
    pub async fn cleanup(&self) -> Result<u64> {
        self.store.delete_expired().await
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }
}
