use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::broadcast;

use tm_engine::{
    DestConfig, NotionAdapter, RateLimitConfig, RateLimiter, Reconciler, Resolver, SourceConfig,
    SyncConfig, SyncQueue, SyncWorker, TodoistAdapter,
};
use tm_server::{create_router, AppState};
use tm_storage::SqliteStateStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let cfg = Arc::new(SyncConfig::from_env());
    let source_cfg = SourceConfig::from_env();
    let dest_cfg = DestConfig::from_env();

    if source_cfg.api_token.is_empty() || dest_cfg.api_token.is_empty() {
        return Err("TM_SOURCE_API_TOKEN and TM_DEST_API_TOKEN are required".into());
    }

    let data_dir = std::env::var("TM_DATA_DIR").unwrap_or_else(|_| "./data".into());
    std::fs::create_dir_all(&data_dir)?;

    // Shared upstream rate limiter; both adapters throttle through it.
    let limiter = Arc::new(RateLimiter::new());
    limiter
        .set_limit("source", RateLimitConfig::default())
        .await;
    limiter.set_limit("dest", RateLimitConfig::default()).await;

    let source = Arc::new(TodoistAdapter::new(&source_cfg, &cfg, Arc::clone(&limiter))?);
    let dest = Arc::new(NotionAdapter::new(&dest_cfg, &cfg, Arc::clone(&limiter))?);
    let store = Arc::new(SqliteStateStore::open(
        &format!("{data_dir}/state.sqlite"),
        &cfg.namespace,
    )?);
    let queue = Arc::new(SyncQueue::open(
        &format!("{data_dir}/queue.sqlite"),
        cfg.retry_max,
    )?);

    let resolver = Arc::new(Resolver::new(
        dest.clone(),
        source.clone(),
        store.clone(),
        Arc::clone(&cfg),
    ));
    let worker = Arc::new(SyncWorker::new(
        Arc::clone(&queue),
        source.clone(),
        dest.clone(),
        store.clone(),
        resolver,
        Arc::clone(&cfg),
    ));
    let reconciler = Arc::new(Reconciler::new(
        source.clone(),
        dest.clone(),
        store.clone(),
        Arc::clone(&worker),
        Arc::clone(&cfg),
    ));

    let (shutdown_tx, _) = broadcast::channel(4);
    let worker_handles = worker.spawn_pool(&shutdown_tx);
    spawn_reconcile_schedule(Arc::clone(&reconciler), &cfg.reconcile_schedule, &shutdown_tx);

    let state = Arc::new(AppState::new(
        Arc::clone(&cfg),
        queue,
        Arc::clone(&worker),
        reconciler,
    ));
    let router = create_router(state);

    let bind_addr = std::env::var("TM_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, workers = cfg.worker_concurrency, "taskmirror listening");

    let server_shutdown = shutdown_tx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = server_shutdown.send(());
        })
        .await?;

    let _ = shutdown_tx.send(());
    for handle in worker_handles {
        let _ = handle.await;
    }
    tracing::info!("shut down cleanly");
    Ok(())
}

/// Run the reconciler on its cron cadence until shutdown.
fn spawn_reconcile_schedule(
    reconciler: Arc<Reconciler>,
    schedule: &str,
    shutdown: &broadcast::Sender<()>,
) {
    let schedule = match cron::Schedule::from_str(schedule) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(expr = %schedule, error = %e, "invalid reconcile schedule, periodic runs disabled");
            return;
        }
    };
    let mut rx = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                tracing::warn!("reconcile schedule has no upcoming runs");
                return;
            };
            let wait = (next - chrono::Utc::now())
                .to_std()
                .unwrap_or_default();
            tracing::debug!(next = %next, "next scheduled reconciliation");
            tokio::select! {
                _ = rx.recv() => return,
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = reconciler.run().await {
                        tracing::error!(error = %e, "scheduled reconciliation failed");
                    }
                }
            }
        }
    });
}
