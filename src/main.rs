use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use whale_tracker::api::{app_router, AppState};
use whale_tracker::config::Settings;
use whale_tracker::query::QueryService;
use whale_tracker::scheduler::{self, RefreshConfig, Refresher};
use whale_tracker::source;
use whale_tracker::stats::Stats;
use whale_tracker::store::SnapshotStore;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let s = Settings::from_env()?;
    init_tracing(&s.log_format);

    let assets = s.tracked_assets();
    let source = source::from_settings(&s)?;
    tracing::info!(
        assets = ?assets,
        top_n = s.top_n,
        source = source.name(),
        interval_sec = s.refresh_interval_sec,
        "starting whale tracker"
    );

    let store = Arc::new(SnapshotStore::new(assets));
    let stats = Stats::new(now_ms());

    let refresher = Arc::new(Refresher::new(
        source,
        store.clone(),
        stats.clone(),
        RefreshConfig {
            interval: s.refresh_interval(),
            inter_asset_delay: s.inter_asset_delay(),
            fetch_timeout: s.fetch_timeout(),
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (refresh, refresh_task) = scheduler::spawn(refresher, shutdown_rx);

    let state = Arc::new(AppState {
        query: QueryService::new(store),
        refresh,
        stats,
        refresh_interval: s.refresh_interval(),
    });

    let addr = s.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = refresh_task.await;
    Ok(())
}
