//! Error types for the gateway
//!
//! A comprehensive error hierarchy using thiserror, coercing every pipeline
//! boundary (auth, validation, policy, execution, provider, reload) into one
//! taxonomy. Components never let raw errors cross a boundary uncoerced.

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("invalid_state: {0}")]
    InvalidState(String),

    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    #[error("policy evaluation error: {0}")]
    PolicyEvaluation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("reload error: {0}")]
    Reload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("secret resolution error: {0}")]
    Secret(String),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors (TokenStore / SqlEngine persistence layer)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err)
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Storage(StorageError::from(err))
    }
}

impl From<uuid::Error> for GatewayError {
    fn from(err: uuid::Error) -> Self {
        GatewayError::Storage(StorageError::UuidParse(err))
    }
}

/// Normalized upstream identity-provider error
///
/// Transport errors, provider error objects (`error`, `error_description`),
/// and invalid JSON all collapse into this shape. Never constructed with a
/// token, secret, or response body in `description`.
#[derive(Error, Debug, Clone)]
#[error("provider error [{kind}] (status {status_code:?}): {description}")]
pub struct ProviderError {
    pub kind: String,
    pub description: String,
    pub status_code: Option<u16>,
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("connection timeout")]
    Timeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Convenient result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    #[inline]
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        GatewayError::Validation(msg.into())
    }

    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GatewayError::Config(msg.into())
    }

    #[inline]
    pub fn secret<S: Into<String>>(msg: S) -> Self {
        GatewayError::Secret(msg.into())
    }

    #[inline]
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        GatewayError::Storage(StorageError::Connection(msg.into()))
    }

    #[inline]
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    #[inline]
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        GatewayError::Forbidden(msg.into())
    }

    #[inline]
    pub fn invalid_grant<S: Into<String>>(msg: S) -> Self {
        GatewayError::InvalidGrant(msg.into())
    }

    #[inline]
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        GatewayError::InvalidState(msg.into())
    }

    #[inline]
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        GatewayError::InvalidRequest(msg.into())
    }

    #[inline]
    pub fn policy_denied<S: Into<String>>(reason: S) -> Self {
        GatewayError::PolicyDenied {
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn execution<S: Into<String>>(msg: S) -> Self {
        GatewayError::Execution(msg.into())
    }

    #[inline]
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        GatewayError::Storage(StorageError::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    #[inline]
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        GatewayError::Internal(msg.into())
    }

    /// Add context to an error without discarding its source
    pub fn context<C: std::fmt::Display>(self, context: C) -> Self {
        match self {
            Self::Validation(msg) => Self::Validation(format!("{}: {}", context, msg)),
            Self::Config(msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::Secret(msg) => Self::Secret(format!("{}: {}", context, msg)),
            Self::Execution(msg) => Self::Execution(format!("{}: {}", context, msg)),
            Self::Reload(msg) => Self::Reload(format!("{}: {}", context, msg)),
            Self::Internal(msg) => Self::Internal(format!("{}: {}", context, msg)),
            other => Self::Internal(format!("{}: {}", context, other)),
        }
    }

    /// OAuth-standard error code for responses where one applies
    pub fn oauth_error_code(&self) -> Option<&'static str> {
        match self {
            Self::Unauthorized(_) => Some("unauthorized"),
            Self::Forbidden(_) => Some("forbidden"),
            Self::InvalidGrant(_) => Some("invalid_grant"),
            Self::InvalidState(_) => Some("invalid_state"),
            Self::UnauthorizedClient(_) => Some("unauthorized_client"),
            Self::InvalidRequest(_) => Some("invalid_request"),
            _ => None,
        }
    }

    /// Audit `error` kind string recorded on the request's `AuditRecord`
    pub fn audit_error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidState(_) => "invalid_state",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Validation(_) => "validation-error",
            Self::PolicyDenied { .. } => "policy-deny",
            Self::PolicyEvaluation(_) => "policy-error",
            Self::Storage(_) => "storage-error",
            Self::Execution(_) => "execution-error",
            Self::Timeout(_) => "timeout",
            Self::Provider(_) => "provider-error",
            Self::Reload(_) => "reload-error",
            Self::Transport(_) => "transport-error",
            _ => "internal-error",
        }
    }
}
