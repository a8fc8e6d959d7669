//! `vault://path#key` secret source — HashiCorp Vault KV v2.
//!
//! Reads `VAULT_ADDR`/`VAULT_TOKEN` at construction (not per-request) so a
//! misconfigured Vault section fails the reload immediately rather than on
//! first use.

use super::SecretSource;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct VaultKvResponse {
    data: VaultKvData,
}

#[derive(Debug, Deserialize)]
struct VaultKvData {
    data: serde_json::Map<String, serde_json::Value>,
}

pub struct VaultSource {
    client: reqwest::Client,
    addr: String,
    token: String,
}

impl VaultSource {
    pub fn new(addr: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            addr: addr.into(),
            token: token.into(),
        }
    }

    fn kv2_url(&self, path: &str) -> String {
        // KV v2 mounts data under `<mount>/data/<path>`; operators write the
        // full data-prefixed path in the reference, matching Vault's own
        // API convention rather than inventing a shorthand.
        format!("{}/v1/{}", self.addr.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl SecretSource for VaultSource {
    async fn resolve_vault(&self, path: &str, key: &str) -> Result<String> {
        let response = self
            .client
            .get(self.kv2_url(path))
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| GatewayError::secret(format!("vault request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::secret(format!(
                "vault returned {} for path {path}",
                response.status()
            )));
        }

        let parsed: VaultKvResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::secret(format!("vault response was not valid KV v2 JSON: {e}")))?;

        match parsed.data.data.get(key) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(GatewayError::secret(format!("vault secret {path} has no key '{key}'"))),
        }
    }
}
