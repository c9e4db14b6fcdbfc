mod auth;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docflow_core::config::{ApiConfig, AuthConfig, RedisConfig, StorageConfig};
use docflow_engines::{default_registry, EngineBinaries};
use docflow_normalizer::DisabledUploader;
use docflow_store::{build_queue, TaskStore};

use crate::routes::build_router;
use crate::state::ApiState;

/// The docflow HTTP API: submission, status, queue administration, and
/// discovery endpoints, all backed by the same store and queue the worker
/// fleet uses.
#[derive(Debug, Parser)]
#[command(name = "docflow-api", version)]
struct Cli {
    #[command(flatten)]
    storage: StorageConfig,

    #[command(flatten)]
    redis: RedisConfig,

    #[command(flatten)]
    api: ApiConfig,

    #[command(flatten)]
    auth: AuthConfig,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = Arc::new(TaskStore::connect(&cli.storage.database_path).await?);
    let queue = build_queue(store.clone(), "docflow-api".to_string(), Duration::from_secs(2), &cli.redis).await;
    let registry = Arc::new(default_registry(&EngineBinaries::default()));
    let uploader = Arc::new(DisabledUploader);

    let service = docflow_service::AppState::new(store, queue, registry, uploader);
    let state = ApiState {
        service,
        storage: cli.storage.clone(),
        auth: cli.auth.clone(),
    };

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.api.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "docflow-api listening");
    axum::serve(listener, app).await?;
    Ok(())
}
