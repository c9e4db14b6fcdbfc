use std::sync::Arc;

use tokio::process::Command;

use crate::cli::Accelerator;
use crate::shutdown::ShutdownFlag;

/// Marker env var the re-exec'd child checks to know it is already bound to
/// a single device rather than itself a supervisor.
pub const CHILD_MARKER: &str = "DOCFLOW_WORKER_DEVICE";
/// Per-child health port override, set by the supervisor so sibling
/// device-bound children never collide on the CLI's shared `--port`.
pub const HEALTH_PORT_OVERRIDE: &str = "DOCFLOW_WORKER_HEALTH_PORT";

/// GPU isolation must happen before any compute library loads (§4.3,
/// §9). A single Rust binary has no per-thread dynamic import ordering to
/// exploit the way the original design did, so this process re-execs
/// itself once per requested device: each child starts with its visible-
/// device environment variable already set, before the child's own
/// `main` — and therefore before any engine it shells out to — ever runs.
/// The parent becomes a thin supervisor: it forwards shutdown to every
/// child and waits for all of them to exit.
pub async fn run(devices: &[u32], base_port: u16, shutdown: Arc<ShutdownFlag>) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut children = Vec::with_capacity(devices.len());
    for (offset, &device) in devices.iter().enumerate() {
        let mut cmd = Command::new(&exe);
        cmd.args(&args);
        cmd.env(CHILD_MARKER, device.to_string());
        cmd.env("CUDA_VISIBLE_DEVICES", device.to_string());
        // Every child inherits the same --port; each needs its own so their
        // health servers don't all try to bind the same address.
        cmd.env(HEALTH_PORT_OVERRIDE, base_port.saturating_add(offset as u16).to_string());
        cmd.kill_on_drop(true);
        let child = cmd.spawn()?;
        tracing::info!(device, pid = child.id(), "spawned device-bound worker child");
        children.push(child);
    }

    loop {
        if shutdown.is_requested() {
            tracing::info!("supervisor forwarding shutdown to worker children");
            break;
        }
        if children.iter_mut().all(|c| matches!(c.try_wait(), Ok(Some(_)))) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }

    for child in &mut children {
        if let Ok(None) = child.try_wait() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                // SAFETY: pid is a live child process id owned by this supervisor.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
    }
    for child in &mut children {
        let _ = child.wait().await;
    }
    Ok(())
}

/// Reads the device this process is bound to, if it was re-exec'd by the
/// supervisor. A non-GPU accelerator, or no devices configured at all,
/// means there is nothing to supervise: the process runs its own worker
/// loop(s) directly against device `None`.
pub fn bound_device() -> Option<u32> {
    std::env::var(CHILD_MARKER).ok().and_then(|v| v.parse().ok())
}

pub fn needs_supervisor(accelerator: Accelerator, devices: &[u32]) -> bool {
    accelerator != Accelerator::Cpu && !devices.is_empty() && bound_device().is_none()
}

/// This process's effective health port: the supervisor's override if it
/// re-exec'd us onto one device, otherwise the CLI's own `--port`.
pub fn effective_health_port(cli_port: u16) -> u16 {
    std::env::var(HEALTH_PORT_OVERRIDE)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(cli_port)
}
