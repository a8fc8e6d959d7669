//! Gateway configuration.
//!
//! Loads and validates `mxcp.config.json` (or `.yaml`/`.yml`): format is
//! detected from the file extension, JSON configs are additionally checked
//! against an embedded `jsonschema` schema, and the resulting `Config` is
//! the fully-resolved object the rest of the gateway receives — no component
//! downstream re-reads the raw file or re-applies a default.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// TokenStore backend (required).
    pub storage: StorageConfig,

    /// Directory of endpoint YAML definitions.
    #[serde(default = "default_endpoints_dir")]
    pub endpoints_dir: String,

    /// Public HTTP transport.
    #[serde(default)]
    pub http: HttpConfig,

    /// OAuth issuer settings.
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Policy engine defaults.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// ReloadCoordinator settings.
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Runtime limits (concurrency, timeouts, recursion).
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Audit sink settings.
    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,

    /// Per-secret-name resolver scheme overrides. Most secret references
    /// are self-describing (`${...}`, `vault://...`); this section only
    /// matters for the Vault/1Password backend endpoints themselves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SecretsConfig>,

    /// Named secret references made available to `NativeEndpoint`s and SQL
    /// parameter binding through the frozen per-generation `SecretMap`.
    /// Resolved once per reload alongside everything else `SecretResolver`
    /// touches.
    #[serde(default, rename = "secretRefs")]
    pub secret_refs: SecretReferenceMap,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing: Option<TracingConfig>,
}

/// TokenStore backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver name: `sqlite`, `postgres`, or `memory`.
    pub driver: String,
    /// Data source name / connection string.
    pub dsn: String,
    /// Read-only flag for the SQL engine pool.
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none", rename = "allowedOrigins")]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(default, rename = "trustProxy")]
    pub trust_proxy: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: None,
            trust_proxy: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    crate::constants::DEFAULT_HTTP_PORT
}

fn default_endpoints_dir() -> String {
    crate::constants::DEFAULT_ENDPOINTS_DIR.to_string()
}

/// OAuth issuer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// If `false`, the gateway runs in verifier mode: no `/register`,
    /// `/authorize`, callback, or `/token` routes are mounted, and bearer
    /// tokens are validated against an external authorization server
    /// instead.
    #[serde(default)]
    pub issuer_enabled: bool,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: i64,
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: i64,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: i64,
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_secs: i64,
    #[serde(default)]
    pub allow_localhost_redirects: bool,
    /// Secret reference (any `SecretResolver` scheme) for the key that
    /// encrypts `ProviderGrant` tokens at rest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_token_key: Option<String>,
    /// Upstream identity providers. The first entry is `AuthService`'s
    /// default provider until multi-provider selection is exposed at
    /// `/authorize`.
    #[serde(default)]
    pub providers: Vec<crate::auth::provider::ProviderConfig>,
    /// Provider-scope → gateway-scope table.
    #[serde(default)]
    pub scope_rules: Vec<crate::policy::ScopeRule>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer_enabled: false,
            issuer: default_issuer(),
            callback_path: default_callback_path(),
            state_ttl_secs: default_state_ttl(),
            code_ttl_secs: default_code_ttl(),
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            refresh_skew_secs: default_refresh_skew(),
            allow_localhost_redirects: false,
            provider_token_key: None,
            providers: Vec::new(),
            scope_rules: Vec::new(),
        }
    }
}

fn default_issuer() -> String {
    format!("http://{}:{}", default_host(), default_port())
}
fn default_callback_path() -> String {
    crate::constants::DEFAULT_CALLBACK_PATH.to_string()
}
fn default_state_ttl() -> i64 {
    crate::constants::DEFAULT_STATE_TTL_SECS
}
fn default_code_ttl() -> i64 {
    crate::constants::DEFAULT_CODE_TTL_SECS
}
fn default_access_ttl() -> i64 {
    crate::constants::DEFAULT_ACCESS_TTL_SECS
}
fn default_refresh_ttl() -> i64 {
    crate::constants::DEFAULT_REFRESH_TTL_SECS
}
fn default_refresh_skew() -> i64 {
    crate::constants::DEFAULT_REFRESH_SKEW_SECS
}

/// Policy engine defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Decision applied when no rule matches an input/output pass.
    #[serde(default = "default_policy_action")]
    pub default_action: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_action: default_policy_action(),
        }
    }
}

fn default_policy_action() -> String {
    "allow".to_string()
}

/// ReloadCoordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadConfig {
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_admin_socket")]
    pub admin_socket_path: String,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout(),
            admin_socket_path: default_admin_socket(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_drain_timeout() -> u64 {
    crate::constants::DEFAULT_DRAIN_TIMEOUT_SECS
}
fn default_shutdown_grace() -> u64 {
    crate::constants::DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_admin_socket() -> String {
    crate::constants::default_admin_socket_path().to_string()
}

/// Runtime limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_sql_timeout")]
    pub default_sql_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub default_request_timeout_secs: u64,
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    #[serde(default = "default_pool_size")]
    pub min_pool_size: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            default_sql_timeout_secs: default_sql_timeout(),
            default_request_timeout_secs: default_request_timeout(),
            max_recursion_depth: default_max_recursion_depth(),
            min_pool_size: default_pool_size(),
        }
    }
}

fn default_max_concurrent_requests() -> usize {
    1000
}
fn default_sql_timeout() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_recursion_depth() -> usize {
    1000
}
fn default_pool_size() -> u32 {
    2
}

/// Audit sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// Path to the newline-delimited-JSON audit log.
    #[serde(default = "default_audit_path")]
    pub path: String,
    /// `true` blocks the response on a durable append; `false` (default)
    /// writes best-effort via a buffered background task.
    #[serde(default)]
    pub durable: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            durable: false,
        }
    }
}

fn default_audit_path() -> String {
    format!("{}/audit.jsonl", crate::constants::default_config_dir())
}

/// Per-scheme secret-backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onepassword: Option<OnePasswordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    pub address: String,
    /// Secret reference for the Vault token itself, e.g. `${VAULT_TOKEN}`.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnePasswordConfig {
    pub connect_host: String,
    pub connect_token: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Optional OpenTelemetry export configuration, wired as an optional
/// exporter layer only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exporter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(crate::constants::CONFIG_FILE_NAME)
    }

    /// Parses JSON or YAML based on file extension, then validates.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GatewayError::not_found("config file", path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;

        if matches!(path.extension().and_then(|s| s.to_str()), Some("json") | None) {
            validate_against_schema(content.as_bytes())?;
        }

        let config: Config = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = match path_ref.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => serde_json::to_string_pretty(self)?,
        };
        fs::write(path_ref, content)?;
        Ok(())
    }

    /// Structural validation beyond what the embedded JSON schema checks
    /// (cross-field invariants the schema can't express).
    pub fn validate(&self) -> Result<()> {
        if self.storage.driver.is_empty() {
            return Err(GatewayError::config("storage.driver is required"));
        }
        match self.storage.driver.as_str() {
            crate::constants::STORAGE_DRIVER_SQLITE
            | crate::constants::STORAGE_DRIVER_POSTGRES
            | crate::constants::STORAGE_DRIVER_MEMORY => {}
            other => {
                return Err(GatewayError::config(format!(
                    "unsupported storage driver '{other}'; supported: sqlite, postgres, memory"
                )));
            }
        }
        if self.storage.dsn.is_empty() && self.storage.driver != crate::constants::STORAGE_DRIVER_MEMORY {
            return Err(GatewayError::config("storage.dsn is required for non-memory drivers"));
        }
        if self.http.port == 0 {
            return Err(GatewayError::config("http.port must be nonzero"));
        }
        if self.http.host.is_empty() {
            return Err(GatewayError::config("http.host cannot be empty"));
        }
        if let Some(ref origins) = self.http.allowed_origins {
            for origin in origins {
                if !origin.starts_with("http://") && !origin.starts_with("https://") {
                    return Err(GatewayError::config(format!(
                        "invalid CORS origin '{origin}': must start with http:// or https://"
                    )));
                }
            }
        }
        if self.oauth.state_ttl_secs <= 0 || self.oauth.code_ttl_secs <= 0 {
            return Err(GatewayError::config("oauth TTLs must be positive"));
        }
        if self.limits.max_concurrent_requests == 0 {
            return Err(GatewayError::config("limits.maxConcurrentRequests must be > 0"));
        }
        if self.limits.min_pool_size < 2 {
            return Err(GatewayError::config("limits.minPoolSize must be >= 2"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                driver: crate::constants::STORAGE_DRIVER_SQLITE.to_string(),
                dsn: crate::constants::default_sqlite_dsn().to_string(),
                read_only: false,
            },
            endpoints_dir: default_endpoints_dir(),
            http: HttpConfig::default(),
            oauth: OAuthConfig::default(),
            policy: PolicyConfig::default(),
            reload: ReloadConfig::default(),
            limits: LimitsConfig::default(),
            audit: AuditConfig::default(),
            log: Some(LogConfig {
                level: Some("info".to_string()),
            }),
            secrets: None,
            secret_refs: SecretReferenceMap::new(),
            tracing: None,
        }
    }
}

/// Embedded structural schema: a deliberately looser check than
/// `Config::validate`. It catches malformed JSON shape before serde's
/// stricter deserialization runs, so config authors get a clearer
/// top-level error.
fn validate_against_schema(raw: &[u8]) -> Result<()> {
    use once_cell::sync::Lazy;

    static CONFIG_SCHEMA: Lazy<jsonschema::Validator> = Lazy::new(|| {
        let schema_json = serde_json::json!({
            "type": "object",
            "required": ["storage"],
            "properties": {
                "storage": {
                    "type": "object",
                    "required": ["driver"],
                    "properties": {
                        "driver": {"type": "string", "minLength": 1},
                        "dsn": {"type": "string"}
                    }
                },
                "endpointsDir": {"type": "string"},
                "http": {
                    "type": "object",
                    "properties": {
                        "host": {"type": "string"},
                        "port": {"type": "integer", "minimum": 1, "maximum": 65535}
                    }
                },
                "oauth": {"type": "object"},
                "policy": {"type": "object"},
                "reload": {"type": "object"},
                "limits": {"type": "object"},
                "audit": {"type": "object"},
                "log": {"type": "object"},
                "secrets": {"type": "object"},
                "tracing": {"type": "object"}
            }
        });
        jsonschema::validator_for(&schema_json).expect("failed to compile config schema")
    });

    let value: Value = serde_json::from_slice(raw)?;
    if !CONFIG_SCHEMA.is_valid(&value) {
        let messages: Vec<String> = CONFIG_SCHEMA
            .iter_errors(&value)
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        return Err(GatewayError::validation(format!(
            "config validation failed:\n  - {}",
            messages.join("\n  - ")
        )));
    }
    Ok(())
}

/// Secret *references* (not values) declared alongside provider credentials
/// and registered client metadata in the user-level config. Kept as a thin
/// typed map: the gateway doesn't know what any given name means, only that
/// it must resolve through [`crate::secrets::SecretResolver`].
pub type SecretReferenceMap = HashMap<String, String>;

pub fn default_endpoints_path(cfg: &Config) -> PathBuf {
    PathBuf::from(&cfg.endpoints_dir)
}

#[cfg(test)]
mod config_test;
