//! Secret resolution.
//!
//! `SecretResolver` turns a secret *reference* string — the kind an operator
//! writes into an endpoint definition or config file — into a plaintext
//! value at load time. Four schemes are supported:
//!
//! - `${NAME}` — process environment variable (`.env` via dotenvy is loaded
//!   once at startup; this is the only place `std::env::var` is called).
//! - `vault://path#key` — a key within a HashiCorp Vault KV v2 secret.
//! - `op://vault/item/field[?attribute=otp]` — a 1Password item field,
//!   optionally requesting the live TOTP rather than the stored value.
//! - `file://path` — the trimmed contents of a local file (e.g. a mounted
//!   Kubernetes secret volume).
//!
//! Resolution happens once per [`crate::reload::ReloadGeneration`] and the
//! result is frozen into a [`crate::model::SecretMap`]; nothing in the
//! request path calls back into a secret source.

mod env;
mod file;
mod onepassword;
mod vault;

pub use env::EnvSource;
pub use file::FileSource;
pub use onepassword::OnePasswordSource;
pub use vault::VaultSource;

use crate::error::{GatewayError, Result};
use crate::model::SecretMap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A parsed secret reference, independent of where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretRef {
    Env {
        name: String,
    },
    Vault {
        path: String,
        key: String,
    },
    OnePassword {
        vault: String,
        item: String,
        field: String,
        attribute: Option<String>,
    },
    File {
        path: String,
    },
}

impl SecretRef {
    /// Parse one of the four supported reference syntaxes. Unrecognized
    /// syntax is a `GatewayError::Secret`, not a silent pass-through — a
    /// malformed reference in config must fail loudly, so an endpoint
    /// referencing an unresolvable secret fails to load rather than
    /// serving with a missing credential.
    pub fn parse(reference: &str) -> Result<Self> {
        if let Some(name) = reference.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() {
                return Err(GatewayError::secret("empty ${} environment reference"));
            }
            return Ok(SecretRef::Env {
                name: name.to_string(),
            });
        }

        if let Some(rest) = reference.strip_prefix("vault://") {
            let (path, key) = rest
                .split_once('#')
                .ok_or_else(|| GatewayError::secret(format!("vault reference missing '#key': {reference}")))?;
            if path.is_empty() || key.is_empty() {
                return Err(GatewayError::secret(format!("malformed vault reference: {reference}")));
            }
            return Ok(SecretRef::Vault {
                path: path.to_string(),
                key: key.to_string(),
            });
        }

        if let Some(rest) = reference.strip_prefix("op://") {
            let (path, attribute) = match rest.split_once('?') {
                Some((path, query)) => (path, parse_attribute(query)),
                None => (rest, None),
            };
            let mut parts = path.splitn(3, '/');
            let (vault, item, field) = match (parts.next(), parts.next(), parts.next()) {
                (Some(v), Some(i), Some(f)) if !v.is_empty() && !i.is_empty() && !f.is_empty() => (v, i, f),
                _ => {
                    return Err(GatewayError::secret(format!(
                        "1Password reference must be op://vault/item/field: {reference}"
                    )));
                }
            };
            return Ok(SecretRef::OnePassword {
                vault: vault.to_string(),
                item: item.to_string(),
                field: field.to_string(),
                attribute,
            });
        }

        if let Some(path) = reference.strip_prefix("file://") {
            if path.is_empty() {
                return Err(GatewayError::secret("empty file:// reference"));
            }
            return Ok(SecretRef::File {
                path: path.to_string(),
            });
        }

        Err(GatewayError::secret(format!(
            "unrecognized secret reference scheme: {reference}"
        )))
    }
}

fn parse_attribute(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|kv| kv.strip_prefix("attribute="))
        .map(|v| v.to_string())
}

/// One scheme's resolution backend. Implementations never cache — caching
/// lives at the `SecretResolver` level, scoped to a reload generation.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn resolve_env(&self, _name: &str) -> Result<String> {
        Err(GatewayError::secret("source does not support the ${} scheme"))
    }
    async fn resolve_vault(&self, _path: &str, _key: &str) -> Result<String> {
        Err(GatewayError::secret("source does not support vault:// references"))
    }
    async fn resolve_onepassword(
        &self,
        _vault: &str,
        _item: &str,
        _field: &str,
        _attribute: Option<&str>,
    ) -> Result<String> {
        Err(GatewayError::secret("source does not support op:// references"))
    }
    async fn resolve_file(&self, _path: &str) -> Result<String> {
        Err(GatewayError::secret("source does not support file:// references"))
    }
}

/// Dispatches each scheme to its dedicated source. Holding one
/// `SecretResolver` per reload generation keeps Vault/1Password network
/// clients alive across many lookups instead of reconnecting per secret.
pub struct SecretResolver {
    env: Arc<dyn SecretSource>,
    vault: Option<Arc<dyn SecretSource>>,
    onepassword: Option<Arc<dyn SecretSource>>,
    file: Arc<dyn SecretSource>,
}

impl SecretResolver {
    /// Construct a resolver with the environment and file sources always
    /// available; Vault and 1Password are configured only if the operator's
    /// config section names them — those schemes fail with a
    /// `GatewayError::Secret` if referenced but not configured.
    pub fn new(vault: Option<Arc<dyn SecretSource>>, onepassword: Option<Arc<dyn SecretSource>>) -> Self {
        Self {
            env: Arc::new(env::EnvSource::new()),
            vault,
            onepassword,
            file: Arc::new(file::FileSource),
        }
    }

    pub async fn resolve(&self, reference: &str) -> Result<String> {
        match SecretRef::parse(reference)? {
            SecretRef::Env { name } => self.env.resolve_env(&name).await,
            SecretRef::Vault { path, key } => {
                let source = self
                    .vault
                    .as_ref()
                    .ok_or_else(|| GatewayError::secret("vault:// referenced but no vault section configured"))?;
                source.resolve_vault(&path, &key).await
            }
            SecretRef::OnePassword {
                vault,
                item,
                field,
                attribute,
            } => {
                let source = self.onepassword.as_ref().ok_or_else(|| {
                    GatewayError::secret("op:// referenced but no 1password section configured")
                })?;
                source
                    .resolve_onepassword(&vault, &item, &field, attribute.as_deref())
                    .await
            }
            SecretRef::File { path } => self.file.resolve_file(&path).await,
        }
    }

    /// Resolve every reference in `references`, failing the whole batch on
    /// the first unresolvable one: a reload fails closed rather than
    /// starting with partially-resolved secrets.
    pub async fn resolve_all(&self, references: &HashMap<String, String>) -> Result<SecretMap> {
        let mut out = SecretMap::with_capacity(references.len());
        for (name, reference) in references {
            let value = self
                .resolve(reference)
                .await
                .map_err(|e| e.context(format!("resolving secret '{name}'")))?;
            out.insert(name.clone(), value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_env_reference() {
        assert_eq!(
            SecretRef::parse("${GITHUB_TOKEN}").unwrap(),
            SecretRef::Env {
                name: "GITHUB_TOKEN".to_string()
            }
        );
    }

    #[test]
    fn parses_vault_reference() {
        assert_eq!(
            SecretRef::parse("vault://secret/data/github#token").unwrap(),
            SecretRef::Vault {
                path: "secret/data/github".to_string(),
                key: "token".to_string(),
            }
        );
    }

    #[test]
    fn parses_onepassword_reference_with_attribute() {
        assert_eq!(
            SecretRef::parse("op://engineering/github/credential?attribute=otp").unwrap(),
            SecretRef::OnePassword {
                vault: "engineering".to_string(),
                item: "github".to_string(),
                field: "credential".to_string(),
                attribute: Some("otp".to_string()),
            }
        );
    }

    #[test]
    fn parses_onepassword_reference_without_attribute() {
        assert_eq!(
            SecretRef::parse("op://engineering/github/credential").unwrap(),
            SecretRef::OnePassword {
                vault: "engineering".to_string(),
                item: "github".to_string(),
                field: "credential".to_string(),
                attribute: None,
            }
        );
    }

    #[test]
    fn parses_file_reference() {
        assert_eq!(
            SecretRef::parse("file:///run/secrets/db-password").unwrap(),
            SecretRef::File {
                path: "/run/secrets/db-password".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(SecretRef::parse("s3://bucket/key").is_err());
    }

    #[test]
    fn rejects_vault_reference_missing_key() {
        assert!(SecretRef::parse("vault://secret/data/github").is_err());
    }

    #[tokio::test]
    async fn resolver_resolves_env_and_fails_vault_when_unconfigured() {
        unsafe {
            std::env::set_var("MXCP_TEST_SECRET", "hunter2");
        }
        let resolver = SecretResolver::new(None, None);
        assert_eq!(resolver.resolve("${MXCP_TEST_SECRET}").await.unwrap(), "hunter2");
        assert!(resolver.resolve("vault://secret/data/x#y").await.is_err());
        unsafe {
            std::env::remove_var("MXCP_TEST_SECRET");
        }
    }
}
