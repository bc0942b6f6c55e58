mod api;
mod clock;
mod codes;
mod config;
mod error;
mod export;
mod host_only;
mod presence;
mod rate_limit;
mod store;
mod submit;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rollcall_store::Database;

use crate::api::AppState;
use crate::clock::SystemClock;
use crate::codes::CodeEngine;
use crate::config::ServerConfig;
use crate::presence::PresenceBus;
use crate::rate_limit::SubmissionThrottle;
use crate::store::StoreHandle;
use crate::submit::SubmissionPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rollcall_server=debug")),
        )
        .init();

    info!(
        "Starting rollcall attendance server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = Database::open_at(&config.database_path).context("Failed to open database")?;
    let store = StoreHandle::new(db, config.storage_timeout);

    let clock: Arc<dyn clock::Clock> = Arc::new(SystemClock::new());
    let codes = Arc::new(CodeEngine::new(
        store.clone(),
        Arc::clone(&clock),
        &config,
    ));
    let presence = PresenceBus::new(store.clone(), Arc::clone(&clock));
    let pipeline = Arc::new(SubmissionPipeline::new(
        store.clone(),
        Arc::clone(&codes),
        presence.clone(),
        Arc::clone(&clock),
    ));

    // Mint codes for every course now and again on every lifetime boundary.
    codes::spawn_refresh_loop(Arc::clone(&codes), store.clone(), config.code_lifetime);

    let throttle = SubmissionThrottle::default();

    // Throttle cleanup every 5 min, forget devices idle >10 min.
    let sweeper = throttle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            sweeper.evict_idle(std::time::Duration::from_secs(600)).await;
        }
    });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;

    let state = AppState {
        store,
        codes,
        presence,
        pipeline,
        clock,
        config: Arc::new(config),
    };

    api::serve(state, throttle, addr, shutdown_signal()).await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
