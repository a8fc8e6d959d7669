//! Core data model for the gateway.
//!
//! Entities owned by the auth subsystem and the audit pipeline. Endpoint
//! definitions and policy rules live in [`crate::registry`] and
//! [`crate::policy`] respectively, since they're constructed and cached
//! differently (per-ReloadGeneration, not per-request).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A client registered via dynamic registration or static config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scope: String,
    pub created_at: DateTime<Utc>,
}

impl RegisteredClient {
    /// Exact-match redirect URI validation — no prefix or pattern matching.
    pub fn allows_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}

/// A one-time record binding an `/authorize` call to its eventual callback.
///
/// Consumed exactly once at callback; deleted on consume or expiry. Its
/// one-time-use property is an invariant enforced by `TokenStore` via a
/// compare-and-delete primitive, not by application-level bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub state_id: String,
    pub client_id: String,
    pub client_redirect_uri: String,
    /// Downstream (client ↔ MXCP) PKCE challenge, if the client sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downstream_pkce_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downstream_pkce_method: Option<String>,
    /// Upstream (MXCP ↔ provider) PKCE verifier MXCP generated itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_pkce_verifier: Option<String>,
    /// The client's original opaque `state`, echoed back at the end of the flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// An MXCP-issued authorization code, consumed exactly once at `/token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub session_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Binding check used when consuming a code at `/token`:
    /// `(client_id, redirect_uri)` must match exactly.
    pub fn matches_binding(&self, client_id: &str, redirect_uri: &str) -> bool {
        self.client_id == client_id && self.redirect_uri == redirect_uri
    }
}

/// Resolved caller identity, derived from the provider's user-info response
/// plus [`crate::policy::ScopeMapper`]. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub provider: String,
    /// Opaque bag of whatever the provider's user-info endpoint returned.
    pub raw_profile: serde_json::Value,
    pub mxcp_scopes: HashSet<String>,
    pub provider_scopes_granted: HashSet<String>,
}

impl UserContext {
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.mxcp_scopes.contains(s))
    }

    /// Project this context into the CEL evaluation binding for `user`.
    /// Never includes provider tokens or secrets.
    pub fn to_cel_value(&self) -> serde_json::Value {
        serde_json::json!({
            "user_id": self.user_id,
            "username": self.username,
            "email": self.email,
            "provider": self.provider,
            "scopes": self.mxcp_scopes.iter().collect::<Vec<_>>(),
            "profile": self.raw_profile,
        })
    }
}

/// Encrypted upstream provider grant held inside a [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderGrant {
    /// Encrypted with a key resolved by SecretResolver; never logged.
    pub access_token_encrypted: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_encrypted: Option<Vec<u8>>,
    pub expires_at: DateTime<Utc>,
    pub granted_scopes: HashSet<String>,
}

/// The server-side record bound to an MXCP-issued opaque access token.
///
/// `access_token_hash` / `refresh_token_hash` are one-way hashes; the
/// plaintext exists only during issuance and in the client. Referenced by
/// bearer token on each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub provider_grant: ProviderGrant,
    pub user: UserContext,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// True once the provider grant is within `skew` of expiry, so it
    /// should be refreshed before use rather than after it fails.
    pub fn provider_needs_refresh(&self, skew: chrono::Duration) -> bool {
        self.provider_grant.expires_at - Utc::now() < skew
    }
}

/// Transport an MCP request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Stdio,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Http => write!(f, "http"),
            Transport::Stdio => write!(f, "stdio"),
        }
    }
}

/// Endpoint kind: tool, resource, or prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Tool,
    Resource,
    Prompt,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Tool => write!(f, "tool"),
            EndpointKind::Resource => write!(f, "resource"),
            EndpointKind::Prompt => write!(f, "prompt"),
        }
    }
}

/// Outcome a policy pass left on an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDecision {
    Allow,
    Deny,
    Filter,
    Mask,
    /// No policy rules applied to this request.
    #[serde(rename = "n/a")]
    NotApplicable,
    Error,
}

/// Request outcome, used both for audit and for coarse metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
}

/// One JSON line per bound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub transport: Transport,
    #[serde(rename = "type")]
    pub kind: EndpointKind,
    pub name: String,
    /// Input with fields marked `sensitive: true` replaced by `"[REDACTED]"`.
    pub input_json: serde_json::Value,
    pub duration_ms: u64,
    pub policy_decision: PolicyDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// A resolved set of named secrets, produced once per reload generation by
/// [`crate::secrets::SecretResolver`]. Never shared across generations.
pub type SecretMap = HashMap<String, String>;

/// A single bound SQL parameter. Named-parameter substitution is the only
/// supported binding — never string concatenation.
#[derive(Debug, Clone)]
pub struct NamedParam {
    pub name: String,
    pub value: serde_json::Value,
}

#[allow(dead_code)]
pub(crate) fn new_uuid_v4() -> Uuid {
    Uuid::new_v4()
}
