//! Gatekeeper sidecar entry point.
//!
//! # Purpose
//! Loads configuration, verification keys and the identity store, then serves
//! auth sub-requests until interrupted. Startup fails before binding if any key
//! material cannot be loaded.
use anyhow::Context;
use gatekeeper::app::{build_router, build_state};
use gatekeeper::config::GatekeeperConfig;
use gatekeeper::observability;
use std::future::Future;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatekeeperConfig::from_env_or_yaml().context("gatekeeper config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: GatekeeperConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("gatekeeper")?;
    let state = match build_state(&config).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "gatekeeper startup failed");
            return Err(err);
        }
    };
    let metrics_bind = config.metrics_bind;
    let metrics_task = tokio::spawn(async move {
        if let Err(err) = observability::serve_metrics(metrics_handle, metrics_bind).await {
            tracing::warn!(error = %err, %metrics_bind, "metrics listener stopped");
        }
    });

    let app = build_router(state);
    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        prefix = %config.path_prefix,
        "gatekeeper listening"
    );
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {
            tracing::info!("shutdown requested");
        }
    }

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}
