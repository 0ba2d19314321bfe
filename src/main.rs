//! Wiring & DI. Entry point: bootstrap adapters, inject into services, serve the API.
//! No business logic here.

use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tg_conductor::adapters::http::{self, AppState};
use tg_conductor::adapters::persistence::{JsonFileStore, JsonlArchive};
use tg_conductor::adapters::telegram::GrammersClientFactory;
use tg_conductor::ports::{ArchiveRepo, KvStore, TgClientFactory};
use tg_conductor::shared::config::AppConfig;
use tg_conductor::usecases::SessionStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);
/// How long in-flight requests (SSE streams included) get after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    let cfg = AppConfig::load()?;
    let (api_id, api_hash) = cfg.credentials()?;

    let listen_addr = cfg.listen_addr();
    tg_conductor::adapters::ui::init_ui(&listen_addr);

    // --- Directories ---
    let data_dir = cfg.data_dir_or_default();
    let sessions_dir = cfg.sessions_dir_or_default();
    for dir in [
        &data_dir,
        &sessions_dir,
        &cfg.downloads_dir_or_default(),
        &cfg.archive_dir_or_default(),
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| anyhow::anyhow!("create {}: {}", dir.display(), e))?;
    }
    let data_dir_abs = data_dir.canonicalize().unwrap_or_else(|_| data_dir.clone());
    info!(path = %data_dir_abs.display(), "data directory");

    // --- Sessions: reclaim copies left behind by a previous run ---
    let sessions = Arc::new(SessionStore::new(&sessions_dir, cfg.session_store_settings()));
    for path in sessions.sweep_orphans().await {
        warn!(path = %path.display(), "operation session still locked by another process");
    }

    // --- Infrastructure ---
    let store: Arc<dyn KvStore> = Arc::new(JsonFileStore::new(&data_dir));
    let archive: Arc<dyn ArchiveRepo> = Arc::new(JsonlArchive::new(cfg.archive_dir_or_default()));
    let clients: Arc<dyn TgClientFactory> = Arc::new(GrammersClientFactory::new(
        api_id,
        api_hash,
        cfg.request_delay(),
    ));

    // --- Services ---
    let state = AppState::build(store, sessions, clients, archive, cfg.core_settings());

    match state.tokens.initialize().await {
        Ok(Some(token)) => {
            info!("admin API token created");
            println!("\nAdmin API token (shown once, store it now):\n  {}\n", token);
        }
        Ok(None) => {}
        Err(e) => anyhow::bail!("token bootstrap failed: {}", e),
    }
    match state.monitor.reclaim_stale_locks().await {
        Ok(n) if n > 0 => info!(released = n, "stale monitoring locks released"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "cannot inspect running instances"),
    }

    // --- Registry pruning ---
    let shutdown = CancellationToken::new();
    let retention = Duration::from_secs(cfg.operation_retention_secs_or_default());
    let registry = Arc::clone(&state.registry);
    let prune_stop = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = prune_stop.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = registry.prune(retention).await;
                    if pruned > 0 {
                        info!(pruned, "finished operations pruned");
                    }
                }
            }
        }
    });

    // --- Serve until Ctrl-C ---
    let listener = TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {}: {}", listen_addr, e))?;
    let runner = Arc::clone(&state.runner);
    let server_stop = shutdown.clone();
    let cors = cfg.cors_origins_or_default();
    let mut server = tokio::spawn(async move {
        http::serve(listener, state, &cors, async move {
            server_stop.cancelled().await
        })
        .await
    });

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    shutdown.cancel();
    runner.cancel_all().await;
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            warn!("open connections did not close in time, aborting");
            server.abort();
        }
    }
    Ok(())
}
