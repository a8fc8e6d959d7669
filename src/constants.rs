//! Constants used throughout the gateway
//!
//! Configuration paths, default TTLs, and HTTP/OAuth surface constants.

use once_cell::sync::Lazy;

// ============================================================================
// CONFIGURATION PATHS
// ============================================================================

/// Get the home directory with fallback to current directory
pub fn get_home_dir() -> &'static str {
    static HOME_DIR: Lazy<String> = Lazy::new(|| {
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string())
    });
    &HOME_DIR
}

/// Default config directory (~/.mxcp)
pub fn default_config_dir() -> &'static str {
    static CONFIG_DIR: Lazy<String> = Lazy::new(|| format!("{}/.mxcp", get_home_dir()));
    &CONFIG_DIR
}

/// Default SQLite DSN for the TokenStore (~/.mxcp/gateway.db)
pub fn default_sqlite_dsn() -> &'static str {
    static SQLITE_DSN: Lazy<String> = Lazy::new(|| format!("{}/gateway.db", default_config_dir()));
    &SQLITE_DSN
}

/// Default endpoint definitions directory
pub const DEFAULT_ENDPOINTS_DIR: &str = "endpoints";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "mxcp.config.json";

/// Default admin socket path
pub fn default_admin_socket_path() -> &'static str {
    static ADMIN_SOCKET: Lazy<String> = Lazy::new(|| format!("{}/admin.sock", default_config_dir()));
    &ADMIN_SOCKET
}

/// Storage driver: SQLite
pub const STORAGE_DRIVER_SQLITE: &str = "sqlite";

/// Storage driver: PostgreSQL
pub const STORAGE_DRIVER_POSTGRES: &str = "postgres";

/// Storage driver: in-memory (tests only)
pub const STORAGE_DRIVER_MEMORY: &str = "memory";

// ============================================================================
// TTL DEFAULTS
// ============================================================================

/// Default TTL for a StateRecord (the `/authorize` → callback leg)
pub const DEFAULT_STATE_TTL_SECS: i64 = 10 * 60;

/// Default TTL for an AuthorizationCode
pub const DEFAULT_CODE_TTL_SECS: i64 = 5 * 60;

/// Default TTL for a Session's MXCP access token
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 60 * 60;

/// Default TTL for a Session's MXCP refresh token
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Default skew window for provider token refresh
pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 5 * 60;

/// Default reload drain timeout
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Default graceful shutdown grace window
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

// ============================================================================
// HTTP & API
// ============================================================================

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header: Authorization
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// OAuth well-known discovery path
pub const OAUTH_DISCOVERY_PATH: &str = "/.well-known/oauth-authorization-server";

/// Default provider callback path
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/oauth/callback";

/// RFC 9728 protected resource metadata path
pub const PROTECTED_RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

// ============================================================================
// AUDIT
// ============================================================================

/// Redaction placeholder for sensitive fields
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Masking placeholder for `mask_fields` policy actions
pub const MASK_PLACEHOLDER: &str = "****";

// ============================================================================
// MISC
// ============================================================================

/// Environment variable: log filter override
pub const ENV_LOG_FILTER: &str = "RUST_LOG";

/// Reserved CEL context binding name for the caller
pub const CEL_RESERVED_USER: &str = "user";

/// Reserved CEL context binding name for the output response
pub const CEL_RESERVED_RESPONSE: &str = "response";
