//! Endpoints backed by native Rust functions rather than a SQL template.
//!
//! A native endpoint is registered by name and invoked with an explicit
//! [`ExecutionContext`] instead of reaching for ambient globals, so a
//! function's dependencies are visible in its signature and swappable in
//! tests.

use crate::engine::sql_engine::SqlEngine;
use crate::error::Result;
use crate::model::SecretMap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a native function receives in place of ambient globals.
pub struct ExecutionContext {
    pub sql: Arc<SqlEngine>,
    pub secrets: SecretMap,
}

/// One native-function endpoint implementation, registered by name and
/// dispatched to from `EndpointSource::Native`.
#[async_trait]
pub trait NativeEndpoint: Send + Sync {
    async fn call(&self, params: &HashMap<String, Value>, ctx: &ExecutionContext) -> Result<Value>;
}

/// The set of native functions available to the gateway. There is no
/// built-in function set — operators wire their own via this registry
/// before the gateway starts serving.
#[derive(Default, Clone)]
pub struct NativeRegistry {
    functions: HashMap<String, Arc<dyn NativeEndpoint>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, endpoint: Arc<dyn NativeEndpoint>) {
        self.functions.insert(name.into(), endpoint);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn NativeEndpoint>> {
        self.functions.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl NativeEndpoint for Echo {
        async fn call(&self, params: &HashMap<String, Value>, _ctx: &ExecutionContext) -> Result<Value> {
            Ok(Value::Object(params.clone().into_iter().collect()))
        }
    }

    #[test]
    fn lookup_returns_registered_function() {
        let mut registry = NativeRegistry::new();
        registry.register("echo", Arc::new(Echo));
        assert!(registry.lookup("echo").is_some());
        assert!(registry.lookup("missing").is_none());
    }
}
