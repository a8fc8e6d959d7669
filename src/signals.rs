//! Process signal handling: `SIGHUP` triggers a reload, `SIGTERM`/`Ctrl+C`
//! triggers graceful shutdown with a grace window.
//!
//! Built on the usual `tokio::signal::unix::signal` + `tokio::select!`
//! pattern for shutting down an async server, extended here to also
//! recognize `SignalKind::hangup` as a reload trigger rather than a
//! termination one.

use crate::reload::ReloadCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// Runs until `SIGTERM` or `Ctrl+C`, reloading on every `SIGHUP` in the
/// meantime. Returns once shutdown should begin; callers are responsible
/// for waiting out their own `shutdown_grace` window afterward (there's no
/// single in-flight-request count to wait on here — `ReloadCoordinator`
/// already pins each request to its own generation `Arc`).
pub async fn wait_for_shutdown(reload: Arc<ReloadCoordinator>) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGHUP handler; reload-on-signal disabled");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, reloading");
                match reload.reload(None).await {
                    Ok(generation) => tracing::info!(generation, "reload triggered by SIGHUP complete"),
                    Err(e) => tracing::error!(error = %e, "reload triggered by SIGHUP failed"),
                }
            }
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                return;
            }
        }
    }
}

/// Waits out the configured shutdown grace window after `wait_for_shutdown`
/// returns, giving in-flight requests (each pinned to their own generation
/// `Arc`) a chance to finish before the process exits.
pub async fn shutdown_grace_period(grace: Duration) {
    tracing::info!(grace_secs = grace.as_secs(), "waiting out shutdown grace period");
    tokio::time::sleep(grace).await;
}
