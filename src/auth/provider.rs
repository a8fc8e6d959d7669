//! `ProviderAdapter`: one implementation per upstream identity provider.
//!
//! Built on `oauth2::basic::BasicClient`, generating PKCE via
//! `PkceCodeChallenge::from_code_verifier_sha256` and exchanging codes
//! against the provider's token endpoint. Providers are static, reload-time
//! configuration rather than a runtime-mutable registry, so adapters expose
//! only the protocol operations the gateway needs.

use crate::error::{GatewayError, ProviderError, Result};
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode as OAuth2AuthCode, ClientId, ClientSecret, CsrfToken, PkceCodeVerifier, RedirectUrl,
    RefreshToken as OAuth2RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// What an adapter hands back from `ExchangeCode`/`RefreshToken`, before the
/// caller (`SessionManager`) encrypts the tokens for storage.
#[derive(Debug, Clone)]
pub struct RawProviderGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub granted_scopes: HashSet<String>,
}

/// One implementation per upstream IdP. Adapters must never log tokens,
/// refresh tokens, secrets, emails, or response bodies.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn build_authorize_url(&self, state_id: &str, redirect_uri: &str, pkce_challenge: Option<&str>) -> String;

    async fn exchange_code(&self, code: &str, redirect_uri: &str, pkce_verifier: Option<&str>)
        -> Result<RawProviderGrant>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<RawProviderGrant>;

    async fn fetch_user_info(&self, access_token: &str) -> Result<serde_json::Value>;

    /// Best-effort; failures are swallowed by the caller.
    async fn revoke_token(&self, token: &str);

    /// Scopes that must all appear in what the provider actually granted,
    /// or the login fails. Empty by default.
    fn required_scopes(&self) -> &[String] {
        &[]
    }
}

/// Static, reload-time configuration for one upstream provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub revoke_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Requested scopes, i.e. `required_scopes ∪ optional_scopes`: the set
    /// actually sent to the provider's authorize endpoint.
    pub scopes: Vec<String>,
    /// Scopes that must appear in what the provider actually grants, or the
    /// login fails.
    #[serde(default)]
    pub required_scopes: Vec<String>,
}

/// A provider adapter driven entirely by OAuth 2.0 generic endpoints —
/// covers any IdP that exposes standard authorize/token/userinfo URLs
/// (Google, GitHub, Okta, etc.) without a provider-specific quirks layer.
pub struct GenericOAuthProvider {
    config: ProviderConfig,
    client: BasicClient,
    http: reqwest::Client,
}

impl GenericOAuthProvider {
    pub fn new(config: ProviderConfig, callback_url: &str) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(config.authorize_url.clone())
                    .map_err(|e| GatewayError::config(format!("invalid authorize_url: {e}")))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| GatewayError::config(format!("invalid token_url: {e}")))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(callback_url.to_string())
                    .map_err(|e| GatewayError::config(format!("invalid callback url: {e}")))?,
            );

        Ok(Self {
            config,
            client,
            http: reqwest::Client::new(),
        })
    }

    fn provider_error(&self, kind: &str, description: impl Into<String>) -> GatewayError {
        GatewayError::Provider(ProviderError {
            kind: kind.to_string(),
            description: description.into(),
            status_code: None,
        })
    }
}

#[async_trait]
impl ProviderAdapter for GenericOAuthProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    /// The issued `state_id` is passed through unmodified as the OAuth
    /// `state` parameter; the stored `StateRecord` is what lets the callback
    /// recover the flow.
    fn build_authorize_url(&self, state_id: &str, _redirect_uri: &str, pkce_challenge: Option<&str>) -> String {
        let mut request = self
            .client
            .authorize_url(|| CsrfToken::new(state_id.to_string()))
            .add_scopes(self.config.scopes.iter().cloned().map(Scope::new));

        if let Some(challenge) = pkce_challenge {
            // Challenge is already computed by SessionManager::create_state;
            // only needs to be attached to the query string here.
            request = request.set_pkce_challenge(oauth2::PkceCodeChallenge::from_code_verifier_sha256(
                &PkceCodeVerifier::new(challenge.to_string()),
            ));
        }

        let (url, _csrf) = request.url();
        url.to_string()
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<RawProviderGrant> {
        let mut request = self.client.exchange_code(OAuth2AuthCode::new(code.to_string()));
        if let Some(verifier) = pkce_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        let http = build_http_client()?;
        let response = request
            .request_async(&http)
            .await
            .map_err(|e| self.provider_error("exchange_failed", e.to_string()))?;

        Ok(grant_from_response(&response))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<RawProviderGrant> {
        let http = build_http_client()?;
        let response = self
            .client
            .exchange_refresh_token(&OAuth2RefreshToken::new(refresh_token.to_string()))
            .request_async(&http)
            .await
            .map_err(|e| self.provider_error("refresh_failed", e.to_string()))?;

        Ok(grant_from_response(&response))
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| self.provider_error("userinfo_transport_error", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(GatewayError::Provider(ProviderError {
                kind: "userinfo_failed".to_string(),
                description: "provider rejected userinfo request".to_string(),
                status_code: Some(status),
            }));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| self.provider_error("userinfo_invalid_json", e.to_string()))
    }

    async fn revoke_token(&self, token: &str) {
        let Some(url) = &self.config.revoke_url else {
            return;
        };
        let _ = self.http.post(url).form(&[("token", token)]).send().await;
    }

    fn required_scopes(&self) -> &[String] {
        &self.config.required_scopes
    }
}

fn grant_from_response(
    response: &oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>,
) -> RawProviderGrant {
    let expires_in = response
        .expires_in()
        .unwrap_or(Duration::from_secs(crate::constants::DEFAULT_ACCESS_TTL_SECS as u64));
    let granted_scopes = response
        .scopes()
        .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();

    RawProviderGrant {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_at: chrono::Utc::now() + chrono::Duration::from_std(expires_in).unwrap_or_default(),
        granted_scopes,
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| GatewayError::internal(format!("failed to build provider http client: {e}")))
}
