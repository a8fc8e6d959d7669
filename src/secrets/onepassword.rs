//! `op://vault/item/field[?attribute=otp]` secret source — 1Password
//! Connect server API.
//!
//! Talks to a self-hosted 1Password Connect instance
//! (`OP_CONNECT_HOST`/`OP_CONNECT_TOKEN`), not the desktop CLI — the
//! gateway runs unattended, so there is no interactive vault unlock.

use super::SecretSource;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct OpVault {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct OpItemSummary {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct OpItem {
    fields: Vec<OpField>,
}

#[derive(Debug, Deserialize)]
struct OpField {
    label: Option<String>,
    id: Option<String>,
    value: Option<String>,
    totp: Option<String>,
}

pub struct OnePasswordSource {
    client: reqwest::Client,
    connect_host: String,
    token: String,
}

impl OnePasswordSource {
    pub fn new(connect_host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            connect_host: connect_host.into(),
            token: token.into(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.connect_host.trim_end_matches('/'), path);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| GatewayError::secret(format!("1password connect request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::secret(format!(
                "1password connect returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| GatewayError::secret(format!("1password connect returned unexpected JSON: {e}")))
    }

    async fn resolve_vault_id(&self, vault_name: &str) -> Result<String> {
        let vaults: Vec<OpVault> = self.get_json("/v1/vaults").await?;
        vaults
            .into_iter()
            .find(|v| v.name == vault_name)
            .map(|v| v.id)
            .ok_or_else(|| GatewayError::secret(format!("1password vault not found: {vault_name}")))
    }

    async fn resolve_item_id(&self, vault_id: &str, item_title: &str) -> Result<String> {
        let items: Vec<OpItemSummary> = self.get_json(&format!("/v1/vaults/{vault_id}/items")).await?;
        items
            .into_iter()
            .find(|i| i.title == item_title)
            .map(|i| i.id)
            .ok_or_else(|| GatewayError::secret(format!("1password item not found: {item_title}")))
    }
}

#[async_trait]
impl SecretSource for OnePasswordSource {
    async fn resolve_onepassword(
        &self,
        vault: &str,
        item: &str,
        field: &str,
        attribute: Option<&str>,
    ) -> Result<String> {
        let vault_id = self.resolve_vault_id(vault).await?;
        let item_id = self.resolve_item_id(&vault_id, item).await?;
        let op_item: OpItem = self
            .get_json(&format!("/v1/vaults/{vault_id}/items/{item_id}"))
            .await?;

        let matched = op_item
            .fields
            .into_iter()
            .find(|f| f.label.as_deref() == Some(field) || f.id.as_deref() == Some(field))
            .ok_or_else(|| GatewayError::secret(format!("1password item {item} has no field '{field}'")))?;

        match attribute {
            Some("otp") => matched
                .totp
                .ok_or_else(|| GatewayError::secret(format!("field '{field}' on {item} has no live TOTP"))),
            Some(other) => Err(GatewayError::secret(format!("unsupported 1password attribute: {other}"))),
            None => matched
                .value
                .ok_or_else(|| GatewayError::secret(format!("field '{field}' on {item} has no value"))),
        }
    }
}
