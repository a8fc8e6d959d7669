//! Owns the transition between runtime generations, triggered by `SIGHUP`,
//! the admin socket, or a programmatic call.
//!
//! The drain-and-swap protocol is built entirely on `Arc` refcounting
//! rather than a hand-rolled in-flight counter: [`ReloadCoordinator::admit`]
//! hands each request its own clone of the current generation's `Arc`, held
//! for the request's full lifetime. A reload waits for `Arc::strong_count`
//! on the current generation to drop back to the coordinator's own
//! reference (bounded by the drain timeout), then swaps in the new
//! generation and, in the background, waits for the *old* generation's
//! strong count to reach zero before closing its `SqlEngine` pool — so a
//! request that outlives the drain timeout still completes against a fully
//! intact generation. When a rebuild callback is supplied, it needs
//! exclusive access to the database file, so the old pool is closed
//! synchronously before the callback runs rather than left for the
//! background task to close later.

use crate::engine::native::NativeRegistry;
use crate::engine::sql_engine::SqlEngine;
use crate::error::{GatewayError, Result};
use crate::model::SecretMap;
use crate::policy::PolicyEvaluator;
use crate::registry::EndpointRegistry;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One immutable snapshot of the runtime. `natives` is intentionally
/// excluded: native Rust functions compile into the binary and can't be
/// hot-swapped without a process restart, so the registry of them is
/// process-lifetime state shared across generations rather than part of
/// each one (documented simplification, see DESIGN.md).
pub struct ReloadGeneration {
    pub number: u64,
    pub registry: Arc<EndpointRegistry>,
    pub secrets: Arc<SecretMap>,
    pub sql: Arc<SqlEngine>,
    pub policies: Arc<PolicyEvaluator>,
}

/// Everything a rebuild produces, before the coordinator assigns it a
/// generation number: a freshly resolved secret map, a freshly loaded
/// endpoint catalog, a freshly opened SQL pool, and freshly compiled
/// policies.
pub struct GenerationParts {
    pub registry: EndpointRegistry,
    pub secrets: SecretMap,
    pub sql: SqlEngine,
    pub policies: PolicyEvaluator,
}

pub type GenerationBuilder = Arc<dyn Fn() -> BoxFuture<'static, Result<GenerationParts>> + Send + Sync>;

/// A caller-supplied hook run with the outgoing generation's SQL pool
/// already closed and the incoming generation's pool not yet open —
/// exclusive access to the database file, for callers that need to run a
/// migration or rebuild step a live connection pool would conflict with.
pub type RebuildFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct ReloadCoordinator {
    /// Read-locked by every admission; write-locked for the duration of a
    /// reload so new requests block on it while in-flight ones, which
    /// already hold their own generation `Arc`, are unaffected by the lock
    /// entirely.
    gate: RwLock<()>,
    current: parking_lot::Mutex<Arc<ReloadGeneration>>,
    reload_lock: tokio::sync::Mutex<()>,
    builder: GenerationBuilder,
    drain_timeout: Duration,
    generation_counter: AtomicU64,
    pub natives: Arc<NativeRegistry>,
}

impl ReloadCoordinator {
    pub fn new(initial: GenerationParts, builder: GenerationBuilder, drain_timeout: Duration, natives: NativeRegistry) -> Self {
        let generation = Arc::new(ReloadGeneration {
            number: 0,
            registry: Arc::new(initial.registry),
            secrets: Arc::new(initial.secrets),
            sql: Arc::new(initial.sql),
            policies: Arc::new(initial.policies),
        });
        Self {
            gate: RwLock::new(()),
            current: parking_lot::Mutex::new(generation),
            reload_lock: tokio::sync::Mutex::new(()),
            builder,
            drain_timeout,
            generation_counter: AtomicU64::new(0),
            natives: Arc::new(natives),
        }
    }

    /// Pin the generation a request will run against for its entire
    /// lifetime: the returned `Arc` keeps that generation's endpoints,
    /// secrets, SQL pool, and policies alive until the request finishes,
    /// even if a reload publishes a newer generation in the meantime.
    pub async fn admit(&self) -> Arc<ReloadGeneration> {
        let _permit = self.gate.read().await;
        self.current.lock().clone()
    }

    pub fn current_number(&self) -> u64 {
        self.current.lock().number
    }

    /// Number of requests currently admitted against the current generation,
    /// derived from its `Arc` strong count rather than a separate counter:
    /// every admitted request holds one clone, and the coordinator itself
    /// holds exactly one, so the difference is the in-flight count.
    pub fn in_flight(&self) -> u64 {
        let current = self.current.lock();
        Arc::strong_count(&current).saturating_sub(1) as u64
    }

    /// Builds a new generation and atomically publishes it in place of the
    /// current one. Safe to call concurrently from `SIGHUP`, the admin
    /// socket, and programmatic hooks; concurrent triggers serialize on
    /// `reload_lock` rather than running independent rebuilds in parallel.
    ///
    /// `rebuild_fn`, when given, runs after the outgoing generation's SQL
    /// pool has been closed and before the incoming generation's pool is
    /// opened, so it can take exclusive ownership of the database file (a
    /// migration tool, for instance). Without it, the outgoing pool is left
    /// open and only closed once every reference to that generation is
    /// dropped, so a request that outlasted the drain timeout still
    /// completes against an intact pool.
    pub async fn reload(&self, rebuild_fn: Option<RebuildFn>) -> Result<u64> {
        let _reload_guard = self.reload_lock.lock().await;
        let _gate = self.gate.write().await;

        let current = self.current.lock().clone();
        let deadline = Instant::now() + self.drain_timeout;
        while Arc::strong_count(&current) > 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if Arc::strong_count(&current) > 1 {
            tracing::warn!(
                generation = current.number,
                "reload drain timeout exceeded; proceeding, old generation retained until in-flight requests complete"
            );
        }

        if let Some(rebuild_fn) = rebuild_fn {
            current.sql.drain().await;
            if let Err(e) = rebuild_fn().await {
                tracing::error!(error = %e, "reload rebuild callback failed; previous generation retained");
                crate::telemetry::record_reload("failure");
                return Err(GatewayError::Reload(format!("rebuild callback failed: {e}")));
            }
        }
        drop(current);

        let parts = match (self.builder)().await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(error = %e, "reload failed; previous generation retained");
                crate::telemetry::record_reload("failure");
                return Err(GatewayError::Reload(format!("building new generation failed: {e}")));
            }
        };

        let number = self.generation_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let new_generation = Arc::new(ReloadGeneration {
            number,
            registry: Arc::new(parts.registry),
            secrets: Arc::new(parts.secrets),
            sql: Arc::new(parts.sql),
            policies: Arc::new(parts.policies),
        });

        let old_generation = {
            let mut guard = self.current.lock();
            std::mem::replace(&mut *guard, new_generation)
        };

        tokio::spawn(async move {
            while Arc::strong_count(&old_generation) > 1 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            old_generation.sql.drain().await;
            tracing::info!(generation = old_generation.number, "old reload generation's sql pool closed");
        });

        crate::telemetry::record_reload("success");
        tracing::info!(generation = number, "reload complete");
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sql_engine::SqlEngine;
    use crate::policy::PolicyEvaluator;
    use crate::registry::EndpointRegistry;

    async fn empty_parts() -> Result<GenerationParts> {
        Ok(GenerationParts {
            registry: EndpointRegistry::default(),
            secrets: SecretMap::new(),
            sql: SqlEngine::connect("sqlite", "sqlite::memory:", 2, false).await?,
            policies: PolicyEvaluator::empty(),
        })
    }

    #[tokio::test]
    async fn reload_publishes_a_new_generation_number() {
        let initial = empty_parts().await.unwrap();
        let builder: GenerationBuilder = Arc::new(|| Box::pin(empty_parts()));
        let coordinator = ReloadCoordinator::new(initial, builder, Duration::from_millis(200), NativeRegistry::new());

        assert_eq!(coordinator.current_number(), 0);
        let number = coordinator.reload(None).await.unwrap();
        assert_eq!(number, 1);
        assert_eq!(coordinator.admit().await.number, 1);
    }

    #[tokio::test]
    async fn in_flight_request_keeps_old_generation_alive_past_reload() {
        let initial = empty_parts().await.unwrap();
        let builder: GenerationBuilder = Arc::new(|| Box::pin(empty_parts()));
        let coordinator = ReloadCoordinator::new(initial, builder, Duration::from_millis(50), NativeRegistry::new());

        let pinned = coordinator.admit().await;
        assert_eq!(pinned.number, 0);

        coordinator.reload(None).await.unwrap();
        // The in-flight request's pinned Arc still observes generation 0
        // even though the coordinator has moved on to generation 1.
        assert_eq!(pinned.number, 0);
        assert_eq!(coordinator.admit().await.number, 1);
    }

    #[tokio::test]
    async fn rebuild_callback_runs_between_old_pool_close_and_new_pool_open() {
        let initial = empty_parts().await.unwrap();
        let builder: GenerationBuilder = Arc::new(|| Box::pin(empty_parts()));
        let coordinator = ReloadCoordinator::new(initial, builder, Duration::from_millis(200), NativeRegistry::new());

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let rebuild: RebuildFn = Arc::new(move || {
            let ran = ran_clone.clone();
            Box::pin(async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
        });

        let number = coordinator.reload(Some(rebuild)).await.unwrap();
        assert_eq!(number, 1);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reload_fails_and_keeps_old_generation_when_rebuild_callback_errors() {
        let initial = empty_parts().await.unwrap();
        let builder: GenerationBuilder = Arc::new(|| Box::pin(empty_parts()));
        let coordinator = ReloadCoordinator::new(initial, builder, Duration::from_millis(200), NativeRegistry::new());

        let rebuild: RebuildFn = Arc::new(|| Box::pin(async { Err(GatewayError::internal("migration failed")) }));

        assert!(coordinator.reload(Some(rebuild)).await.is_err());
        assert_eq!(coordinator.current_number(), 0);
    }
}
