use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

mod api;
mod cli;
mod jwt;
mod password;

use lumina_cache::KeyCache;
use lumina_core::ProxyCore;
use lumina_keys::KeyService;
use lumina_logs::Pipeline;
use lumina_storage::Store;

use crate::api::ApiState;
use crate::cli::Cli;
use crate::jwt::JwtManager;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    if let Err(err) = run(cli).await {
        eprintln!("lumina failed: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    cli.validate()?;

    let store = Store::connect(&cli.database_url).await?;
    info!("database connected");
    store.sync().await?;
    info!("schema synced");

    let cache = KeyCache::connect(&cli.redis_url).await?;
    info!("cache connected");

    let pipeline = Arc::new(Pipeline::new(&cli.opensearch_url).await?);
    info!("log pipeline started");

    let keys = Arc::new(KeyService::new(
        store.clone(),
        cache,
        cli.encryption_key.as_bytes(),
    )?);
    let jwt = JwtManager::new(&cli.jwt_secret);

    let proxy = ProxyCore::new(keys.clone(), pipeline.clone())?;
    let api_state = ApiState {
        store,
        keys,
        logs: Some(pipeline.clone()),
        jwt,
    };
    let app = proxy.router().merge(api::api_router(api_state));

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "server listening");

    let draining = Arc::new(Notify::new());
    let graceful = axum::serve(listener, app).with_graceful_shutdown({
        let draining = draining.clone();
        async move {
            shutdown_signal().await;
            info!("shutting down server");
            draining.notify_one();
        }
    });
    let deadline = async {
        draining.notified().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };
    tokio::select! {
        result = graceful => result?,
        _ = deadline => warn!("grace period elapsed, aborting in-flight requests"),
    }

    pipeline.close().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("{level},sea_orm=warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
