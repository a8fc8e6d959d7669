//! `AuthService`: composes a `ProviderAdapter` and `SessionManager` into the
//! `/register`, `/authorize`, callback, and `/token` HTTP surface, plus
//! `verify_token` for request admission and the `.well-known` discovery
//! metadata clients use to find those endpoints.
//!
//! Security idioms — redirect-URI exact match, PKCE verification,
//! rand-backed client secret generation — follow the same shape used
//! elsewhere in this codebase's token-issuing paths. This gateway acts as
//! its own downstream OAuth issuer, re-minting a session-scoped token pair
//! after exchanging the upstream provider's grant, rather than forwarding
//! the upstream token directly: a consent step between `/authorize` and the
//! callback was considered and dropped, since the upstream provider already
//! owns that decision.

use crate::auth::provider::ProviderAdapter;
use crate::config::OAuthConfig;
use crate::error::{GatewayError, Result};
use crate::model::{RegisteredClient, UserContext};
use crate::policy::ScopeMapper;
use crate::storage::TokenStore;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::session_manager::SessionManager;

pub struct AuthService {
    store: Arc<dyn TokenStore>,
    sessions: Arc<SessionManager>,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    scope_mapper: Arc<ScopeMapper>,
    config: OAuthConfig,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        sessions: Arc<SessionManager>,
        providers: HashMap<String, Arc<dyn ProviderAdapter>>,
        scope_mapper: Arc<ScopeMapper>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            providers,
            scope_mapper,
            config,
        }
    }

    fn callback_url(&self) -> String {
        format!("{}{}", self.config.issuer, self.config.callback_path)
    }

    fn default_provider(&self) -> Result<&Arc<dyn ProviderAdapter>> {
        self.providers
            .values()
            .next()
            .ok_or_else(|| GatewayError::config("no OAuth provider configured"))
    }

    /// Resolves a bearer token to the user it was issued to. Shared by the
    /// admission middleware regardless of which upstream provider issued
    /// the session it backs.
    pub async fn verify_token(&self, bearer: &str) -> Result<UserContext> {
        let session = self.sessions.lookup_session_by_access_token(bearer).await?;
        Ok(session.user)
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/register", post(handle_register))
            .route("/authorize", get(handle_authorize))
            .route(&self.config.callback_path.clone(), get(handle_callback))
            .route("/token", post(handle_token))
            .route(crate::constants::OAUTH_DISCOVERY_PATH, get(handle_authorization_server_metadata))
            .route(crate::constants::PROTECTED_RESOURCE_METADATA_PATH, get(handle_protected_resource_metadata))
            .with_state(self)
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    client_name: String,
    redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    grant_types: Vec<String>,
    #[serde(default)]
    scope: Option<String>,
    /// Confidential clients may request a secret; public clients (native
    /// apps, SPAs using PKCE) typically don't.
    #[serde(default)]
    token_endpoint_auth_method: Option<String>,
}

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string(), "refresh_token".to_string()]
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    client_name: String,
    redirect_uris: Vec<String>,
    grant_types: Vec<String>,
    scope: String,
}

async fn handle_register(
    State(service): State<Arc<AuthService>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if req.redirect_uris.is_empty() {
        return Err(ApiError::invalid_request("redirect_uris must not be empty"));
    }
    for uri in &req.redirect_uris {
        if !is_valid_redirect_uri(uri, service.config.allow_localhost_redirects) {
            return Err(ApiError::invalid_request(format!("redirect_uri not allowed: {uri}")));
        }
    }

    let client_id = crate::model::new_uuid_v4().to_string();
    let is_confidential = req.token_endpoint_auth_method.as_deref() != Some("none");
    let client_secret = is_confidential.then(generate_client_secret);

    let client = RegisteredClient {
        client_id: client_id.clone(),
        client_secret: client_secret.clone(),
        client_name: req.client_name,
        redirect_uris: req.redirect_uris,
        grant_types: req.grant_types,
        scope: req.scope.unwrap_or_default(),
        created_at: Utc::now(),
    };

    service.store.save_client(&client).await?;

    Ok(Json(RegisterResponse {
        client_id: client.client_id,
        client_secret,
        client_name: client.client_name,
        redirect_uris: client.redirect_uris,
        grant_types: client.grant_types,
        scope: client.scope,
    }))
}

/// HTTPS or `localhost`/`127.0.0.1` with no fragment (RFC 8252 native-app
/// loopback allowance).
fn is_valid_redirect_uri(uri: &str, allow_localhost: bool) -> bool {
    let Ok(parsed) = url::Url::parse(uri) else {
        return false;
    };
    if parsed.fragment().is_some() {
        return false;
    }
    if parsed.scheme() == "https" {
        return true;
    }
    if allow_localhost && parsed.scheme() == "http" {
        return matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1") | Some("::1"));
    }
    false
}

fn generate_client_secret() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// RFC 8414 authorization server metadata, served at
/// [`crate::constants::OAUTH_DISCOVERY_PATH`] so a client can discover every
/// endpoint on this surface, the grant types and PKCE methods it accepts,
/// from the issuer URL alone.
#[derive(Debug, Serialize)]
struct AuthorizationServerMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    registration_endpoint: String,
    grant_types_supported: Vec<&'static str>,
    response_types_supported: Vec<&'static str>,
    code_challenge_methods_supported: Vec<&'static str>,
    token_endpoint_auth_methods_supported: Vec<&'static str>,
}

async fn handle_authorization_server_metadata(State(service): State<Arc<AuthService>>) -> Json<AuthorizationServerMetadata> {
    let issuer = service.config.issuer.clone();
    Json(AuthorizationServerMetadata {
        authorization_endpoint: format!("{issuer}/authorize"),
        token_endpoint: format!("{issuer}/token"),
        registration_endpoint: format!("{issuer}/register"),
        issuer,
        grant_types_supported: vec!["authorization_code", "refresh_token"],
        response_types_supported: vec!["code"],
        code_challenge_methods_supported: vec![crate::auth::pkce::METHOD_S256, crate::auth::pkce::METHOD_PLAIN],
        token_endpoint_auth_methods_supported: vec!["client_secret_post", "none"],
    })
}

/// RFC 9728 protected resource metadata, served at
/// [`crate::constants::PROTECTED_RESOURCE_METADATA_PATH`]: points a resource
/// client (an MCP client, not an end user's browser) back at this same
/// issuer as the only authorization server protecting it.
#[derive(Debug, Serialize)]
struct ProtectedResourceMetadata {
    resource: String,
    authorization_servers: Vec<String>,
}

async fn handle_protected_resource_metadata(State(service): State<Arc<AuthService>>) -> Json<ProtectedResourceMetadata> {
    let issuer = service.config.issuer.clone();
    Json(ProtectedResourceMetadata {
        resource: issuer.clone(),
        authorization_servers: vec![issuer],
    })
}

#[derive(Debug, Deserialize)]
struct AuthorizeRequest {
    client_id: String,
    redirect_uri: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code_challenge: Option<String>,
    #[serde(default)]
    code_challenge_method: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    scope: Option<String>,
}

async fn handle_authorize(
    State(service): State<Arc<AuthService>>,
    Query(req): Query<AuthorizeRequest>,
) -> Result<Response, ApiError> {
    let client = service
        .store
        .get_client(&req.client_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized_client", "unknown client_id"))?;

    if !client.allows_redirect_uri(&req.redirect_uri) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is not registered for this client",
        ));
    }

    let provider = service.default_provider().map_err(ApiError::from)?;

    let (record, upstream_verifier) = service
        .sessions
        .create_state(
            &req.client_id,
            &req.redirect_uri,
            req.code_challenge,
            req.code_challenge_method,
            true,
            req.state,
        )
        .await
        .map_err(ApiError::from)?;

    let upstream_challenge = upstream_verifier.as_deref().map(crate::auth::pkce::challenge_from_verifier);
    let authorize_url = provider.build_authorize_url(&record.state_id, &service.callback_url(), upstream_challenge.as_deref());

    Ok(Redirect::to(&authorize_url).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

async fn handle_callback(
    State(service): State<Arc<AuthService>>,
    Query(req): Query<CallbackRequest>,
) -> Result<Response, ApiError> {
    let record = service.sessions.consume_state(&req.state).await.map_err(ApiError::from)?;

    if let Some(error) = req.error {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "access_denied", error));
    }
    let code = req
        .code
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", "missing code"))?;

    let provider = service.default_provider().map_err(ApiError::from)?;

    let grant = provider
        .exchange_code(&code, &service.callback_url(), record.upstream_pkce_verifier.as_deref())
        .await
        .map_err(ApiError::from)?;

    if !provider.required_scopes().iter().all(|s| grant.granted_scopes.contains(s)) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "access_denied",
            "provider did not grant all required scopes",
        ));
    }

    let raw_profile = provider.fetch_user_info(&grant.access_token).await.map_err(ApiError::from)?;

    let mxcp_scopes = service.scope_mapper.map(&grant.granted_scopes, &raw_profile);

    let user_id = raw_profile
        .get("sub")
        .or_else(|| raw_profile.get("id"))
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| crate::model::new_uuid_v4().to_string());

    let user = UserContext {
        user_id,
        username: raw_profile.get("username").and_then(|v| v.as_str()).map(str::to_string),
        email: raw_profile.get("email").and_then(|v| v.as_str()).map(str::to_string),
        provider: provider.name().to_string(),
        raw_profile,
        mxcp_scopes,
        provider_scopes_granted: grant.granted_scopes.clone(),
    };

    let (session, _access_plain, _refresh_plain) = service.sessions.issue_session(user, grant).await.map_err(ApiError::from)?;

    let downstream_code = service
        .sessions
        .issue_authorization_code(
            &session.session_id,
            &record.client_id,
            &record.client_redirect_uri,
            record.downstream_pkce_challenge,
            record.downstream_pkce_method,
        )
        .await
        .map_err(ApiError::from)?;

    let mut redirect_url = url::Url::parse(&record.client_redirect_uri)
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", "invalid client redirect_uri"))?;
    redirect_url.query_pairs_mut().append_pair("code", &downstream_code);
    if let Some(state) = record.client_state {
        redirect_url.query_pairs_mut().append_pair("state", &state);
    }

    Ok(Redirect::to(redirect_url.as_str()).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
enum TokenRequest {
    AuthorizationCode {
        code: String,
        client_id: String,
        redirect_uri: String,
        #[serde(default)]
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        #[serde(default)]
        #[allow(dead_code)]
        client_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct TokenResponsePayload {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    scope: String,
}

async fn handle_token(
    State(service): State<Arc<AuthService>>,
    axum::extract::Form(req): axum::extract::Form<TokenRequest>,
) -> Result<Json<TokenResponsePayload>, ApiError> {
    match req {
        TokenRequest::AuthorizationCode {
            code,
            client_id,
            redirect_uri,
            code_verifier,
        } => {
            let session_id = service
                .sessions
                .consume_authorization_code(&code, &client_id, &redirect_uri, code_verifier.as_deref())
                .await
                .map_err(ApiError::from)?;

            // The authorization code's binding is already verified; the
            // plaintext access/refresh tokens were only available at
            // `issue_session` time, so `/token` must mint a fresh pair tied
            // to the same session record rather than replay the originals.
            reissue_tokens_for_session(&service, &session_id).await
        }
        TokenRequest::RefreshToken { refresh_token, .. } => {
            rotate_refresh_token(&service, &refresh_token).await
        }
    }
}

/// `/token`'s authorization_code leg needs the session that `issue_session`
/// already created; since only hashes are stored, the access/refresh pair
/// handed back here is freshly minted and the old one (issued at callback
/// time but never given to the client) is invalidated by overwriting the
/// session's hashes.
async fn reissue_tokens_for_session(service: &Arc<AuthService>, session_id: &str) -> Result<Json<TokenResponsePayload>, ApiError> {
    let mut session = service
        .store
        .get_session(session_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "invalid_grant", "session not found"))?;

    let access_plain = rand_token();
    let refresh_plain = rand_token();
    session.access_token_hash = hash_token(&access_plain);
    session.refresh_token_hash = hash_token(&refresh_plain);

    service.store.update_session(&session).await.map_err(ApiError::from)?;

    Ok(Json(TokenResponsePayload {
        access_token: access_plain,
        token_type: "Bearer",
        expires_in: service.sessions.access_ttl().num_seconds(),
        refresh_token: Some(refresh_plain),
        scope: session.user.mxcp_scopes.into_iter().collect::<Vec<_>>().join(" "),
    }))
}

async fn rotate_refresh_token(service: &Arc<AuthService>, refresh_token: &str) -> Result<Json<TokenResponsePayload>, ApiError> {
    let hash = hash_token(refresh_token);
    let mut session = service
        .store
        .get_session_by_refresh_hash(&hash)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "invalid_grant", "unknown refresh token"))?;

    if session.is_expired() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "invalid_grant", "session expired"));
    }

    let access_plain = rand_token();
    let new_refresh_plain = rand_token();
    session.access_token_hash = hash_token(&access_plain);
    session.refresh_token_hash = hash_token(&new_refresh_plain);

    service.store.update_session(&session).await.map_err(ApiError::from)?;

    Ok(Json(TokenResponsePayload {
        access_token: access_plain,
        token_type: "Bearer",
        expires_in: service.sessions.access_ttl().num_seconds(),
        refresh_token: Some(new_refresh_plain),
        scope: session.user.mxcp_scopes.into_iter().collect::<Vec<_>>().join(" "),
    }))
}

fn rand_token() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// RFC 6749 `§5.2` error body shape.
#[derive(Debug, Serialize)]
struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    error_description: String,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            error_description: description.into(),
        }
    }

    fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", description)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match err.oauth_error_code() {
            Some("unauthorized") | Some("invalid_grant") | Some("invalid_state") => StatusCode::BAD_REQUEST,
            Some("forbidden") | Some("unauthorized_client") => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.oauth_error_code().unwrap_or("server_error"), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
