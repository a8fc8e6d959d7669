//! Dependency wiring: turns a loaded [`Config`] into the object graph the
//! gateway serves from.
//!
//! Two halves, matching the reload boundary: [`build_generation_parts`]
//! produces everything a reload rebuilds (`EndpointRegistry`, `SecretMap`,
//! `SqlEngine`, `PolicyEvaluator`); [`build_gateway`] additionally wires the
//! process-lifetime half (`TokenStore`, `AuthService`, `AuditSink`,
//! `ReloadCoordinator`) that survives reloads untouched and owns the first
//! generation.

use crate::auth::provider::{GenericOAuthProvider, ProviderAdapter};
use crate::auth::service::AuthService;
use crate::auth::session_manager::SessionManager;
use crate::config::Config;
use crate::crypto::TokenCipher;
use crate::engine::sql_engine::SqlEngine;
use crate::engine::ExecutionEngine;
use crate::error::{GatewayError, Result};
use crate::policy::{PolicyEvaluator, ScopeMapper};
use crate::registry::EndpointRegistry;
use crate::reload::{GenerationBuilder, GenerationParts, ReloadCoordinator};
use crate::secrets::{OnePasswordSource, SecretRef, SecretResolver, SecretSource, VaultSource};
use crate::storage::{create_token_store, TokenStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything the gateway needs to serve requests, assembled once at
/// startup. `reload` owns the hot-swappable half of the state; `auth` and
/// `audit` are process-lifetime and read through `reload.admit()` on every
/// request.
pub struct Gateway {
    pub config: Config,
    pub store: Arc<dyn TokenStore>,
    pub auth: Arc<AuthService>,
    pub reload: Arc<ReloadCoordinator>,
    pub engine: Arc<ExecutionEngine>,
    pub audit: Arc<crate::audit::AuditSink>,
}

/// Resolves a secret reference that must be available before the full
/// `SecretResolver` can be built — e.g. the Vault/1Password API token
/// itself. Only the `${NAME}` and `file://` schemes make sense at this
/// bootstrap point; `vault://`/`op://` would be circular.
async fn resolve_bootstrap_secret(reference: &str) -> Result<String> {
    match SecretRef::parse(reference)? {
        SecretRef::Env { name } => {
            std::env::var(&name).map_err(|_| GatewayError::secret(format!("environment variable not set: {name}")))
        }
        SecretRef::File { path } => {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| GatewayError::secret(format!("reading secret file {path}: {e}")))?;
            Ok(contents.trim_end_matches(['\n', '\r']).to_string())
        }
        _ => Err(GatewayError::secret(format!(
            "bootstrap secret '{reference}' must use the ${{}} or file:// scheme"
        ))),
    }
}

async fn build_secret_resolver(config: &Config) -> Result<SecretResolver> {
    let mut vault: Option<Arc<dyn SecretSource>> = None;
    let mut onepassword: Option<Arc<dyn SecretSource>> = None;

    if let Some(secrets) = &config.secrets {
        if let Some(v) = &secrets.vault {
            let token = resolve_bootstrap_secret(&v.token).await?;
            vault = Some(Arc::new(VaultSource::new(v.address.clone(), token)));
        }
        if let Some(op) = &secrets.onepassword {
            let token = resolve_bootstrap_secret(&op.connect_token).await?;
            onepassword = Some(Arc::new(OnePasswordSource::new(op.connect_host.clone(), token)));
        }
    }

    Ok(SecretResolver::new(vault, onepassword))
}

/// Re-runs `SecretResolver`, re-loads the `EndpointRegistry` from disk,
/// opens a fresh `SqlEngine` pool, and recompiles policies — everything a
/// reload rebuilds, bundled so the caller can either use it for the first
/// generation or hand it to `ReloadCoordinator` as the rebuild closure.
pub async fn build_generation_parts(config: &Config) -> Result<GenerationParts> {
    let resolver = build_secret_resolver(config).await?;
    let secrets = resolver.resolve_all(&config.secret_refs).await?;

    let registry = EndpointRegistry::load_from_dir(&config.endpoints_dir)?;

    let sql = SqlEngine::connect(
        &config.storage.driver,
        &config.storage.dsn,
        config.limits.min_pool_size,
        config.storage.read_only,
    )
    .await?;

    let all_rules: Vec<_> = [
        crate::model::EndpointKind::Tool,
        crate::model::EndpointKind::Resource,
        crate::model::EndpointKind::Prompt,
    ]
    .into_iter()
    .flat_map(|kind| registry.list(kind).into_iter().flat_map(|e| e.policies.clone()))
    .collect();
    let policies = PolicyEvaluator::compile_rules(&all_rules)?;

    Ok(GenerationParts {
        registry,
        secrets,
        sql,
        policies,
    })
}

fn build_providers(config: &Config) -> Result<HashMap<String, Arc<dyn ProviderAdapter>>> {
    let callback_url = format!("{}{}", config.oauth.issuer, config.oauth.callback_path);
    let mut providers: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    for provider_config in &config.oauth.providers {
        let adapter = GenericOAuthProvider::new(provider_config.clone(), &callback_url)?;
        providers.insert(provider_config.name.clone(), Arc::new(adapter));
    }
    Ok(providers)
}

/// Assemble the full process-lifetime gateway: opens the `TokenStore`,
/// builds the first `ReloadGeneration` via [`build_generation_parts`], and
/// wires `AuthService`/`ExecutionEngine` on top.
pub async fn build_gateway(config: Config) -> Result<Gateway> {
    let store = create_token_store(&config.storage).await?;

    let provider_token_key = match &config.oauth.provider_token_key {
        Some(reference) => resolve_bootstrap_secret(reference).await?,
        None => {
            tracing::warn!("oauth.providerTokenKey not set; provider tokens are encrypted with an ephemeral key that will not survive a restart");
            crate::model::new_uuid_v4().to_string()
        }
    };
    let cipher = TokenCipher::new(&provider_token_key);
    let sessions = Arc::new(SessionManager::new(store.clone(), cipher, &config.oauth));

    let providers = build_providers(&config)?;
    let scope_mapper = Arc::new(ScopeMapper::new(config.oauth.scope_rules.clone()));
    let auth = Arc::new(AuthService::new(store.clone(), sessions, providers, scope_mapper, config.oauth.clone()));

    let audit = Arc::new(crate::audit::AuditSink::open(config.audit.path.clone(), config.audit.durable)?);

    let initial = build_generation_parts(&config).await?;

    let builder_config = config.clone();
    let builder: GenerationBuilder = Arc::new(move || {
        let config = builder_config.clone();
        Box::pin(async move { build_generation_parts(&config).await })
    });

    let reload = Arc::new(ReloadCoordinator::new(
        initial,
        builder,
        Duration::from_secs(config.reload.drain_timeout_secs),
        crate::engine::native::NativeRegistry::new(),
    ));

    let engine = Arc::new(ExecutionEngine::new(
        reload.clone(),
        auth.clone(),
        audit.clone(),
        config.endpoints_dir.clone(),
        Duration::from_secs(config.limits.default_sql_timeout_secs),
        Duration::from_secs(config.limits.default_request_timeout_secs),
    ));

    Ok(Gateway {
        config,
        store,
        auth,
        reload,
        engine,
        audit,
    })
}
