//! `${NAME}` environment-variable secret source.

use super::SecretSource;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;

/// Reads secrets from the process environment. Loads a local `.env` file
/// via dotenvy on construction; this is the only place in the gateway
/// `dotenvy::dotenv()` or `std::env::var` for secret values is called.
pub struct EnvSource;

impl EnvSource {
    pub fn new() -> Self {
        let _ = dotenvy::dotenv();
        Self
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretSource for EnvSource {
    async fn resolve_env(&self, name: &str) -> Result<String> {
        std::env::var(name).map_err(|_| GatewayError::secret(format!("environment variable not set: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_set_variable() {
        unsafe {
            std::env::set_var("MXCP_ENV_SOURCE_TEST", "value");
        }
        let source = EnvSource::new();
        assert_eq!(source.resolve_env("MXCP_ENV_SOURCE_TEST").await.unwrap(), "value");
        unsafe {
            std::env::remove_var("MXCP_ENV_SOURCE_TEST");
        }
    }

    #[tokio::test]
    async fn missing_variable_is_an_error() {
        let source = EnvSource::new();
        assert!(source.resolve_env("MXCP_ENV_SOURCE_DOES_NOT_EXIST").await.is_err());
    }
}
