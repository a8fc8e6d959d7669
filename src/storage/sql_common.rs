//! Shared (de)serialization helpers for the SQL-backed `TokenStore` impls.
//!
//! SQLite stores composite fields (`redirect_uris`, `provider_grant`, ...) as
//! JSON text columns; Postgres stores the same fields as native `JSONB` via
//! `sqlx::types::Json`. These helpers cover the SQLite text-column side.

use crate::error::{GatewayError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn to_json_string<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| GatewayError::internal(format!("failed to serialize column: {e}")))
}

pub fn from_json_str<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| GatewayError::internal(format!("failed to parse column: {e}")))
}
