mod cli;
mod health;
mod identity;
mod runtime;
mod shutdown;
mod supervisor;
mod vllm;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docflow_engines::{default_registry, EngineBinaries};
use docflow_normalizer::DisabledUploader;
use docflow_store::{build_queue, TaskStore};

use crate::cli::{Accelerator, Cli};
use crate::shutdown::ShutdownFlag;
use crate::vllm::VllmEndpointPool;

/// How long a draining worker gives an in-flight task to finish before
/// abandoning it to the stale-claim sweep.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(300);

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

    let shutdown = ShutdownFlag::new();
    shutdown::install(shutdown.clone());

    if supervisor::needs_supervisor(cli.accelerator, &cli.devices) {
        return supervisor::run(&cli.devices, cli.port, shutdown).await;
    }

    let health_port = supervisor::effective_health_port(cli.port);

    // Either this process was re-exec'd by the supervisor (bound to exactly
    // one device, with CUDA_VISIBLE_DEVICES already scoped by the parent)
    // or it never needed one: cpu-only, or a single device the caller chose
    // not to isolate.
    let devices: Vec<Option<u32>> = match supervisor::bound_device() {
        Some(device) => vec![Some(device)],
        None if cli.accelerator == Accelerator::Cpu || cli.devices.is_empty() => vec![None],
        None => cli.devices.iter().map(|d| Some(*d)).collect(),
    };

    let store = Arc::new(TaskStore::connect(&cli.storage.database_path).await?);
    let registry = Arc::new(default_registry(&EngineBinaries::default()));
    let uploader: Arc<dyn docflow_normalizer::ImageUploader> = Arc::new(DisabledUploader);
    let vllm_pool = Arc::new(VllmEndpointPool::from_env());

    let health_handle = tokio::spawn(health::serve(
        health_port,
        identity::worker_id(devices.first().copied().flatten(), 0),
        shutdown.clone(),
    ));

    if cli.disable_worker_loop {
        tracing::info!("worker loop disabled, running health endpoint only");
        health_handle.await??;
        return Ok(());
    }

    let mut loops = Vec::new();
    for device in &devices {
        for slot in 0..cli.workers_per_device {
            let worker_id = identity::worker_id(*device, slot);
            let queue = build_queue(store.clone(), worker_id.clone(), cli.poll_interval, &cli.redis).await;
            let ctx = Arc::new(runtime::WorkerContext {
                worker_id,
                device: *device,
                store: store.clone(),
                queue,
                registry: registry.clone(),
                uploader: uploader.clone(),
                storage: cli.storage.clone(),
                split: cli.split.clone(),
                poll_interval: cli.poll_interval,
                vllm_endpoint: vllm_pool.assign(),
            });
            let shutdown = shutdown.clone();
            loops.push(tokio::spawn(async move {
                runtime::run(ctx, shutdown, SHUTDOWN_GRACE_PERIOD).await;
            }));
        }
    }

    tracing::info!(loops = loops.len(), "worker loops started");

    for handle in loops {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "worker loop task panicked");
        }
    }

    health_handle.abort();
    Ok(())
}
