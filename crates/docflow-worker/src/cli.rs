use clap::{Parser, ValueEnum};
use docflow_core::config::{RedisConfig, SplitConfig, StorageConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Accelerator {
    Auto,
    Cuda,
    Cpu,
}

/// A docflow worker process: binds one or more workers to local devices and
/// polls the priority queue for pending tasks.
#[derive(Debug, Parser)]
#[command(name = "docflow-worker", version)]
pub struct Cli {
    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub split: SplitConfig,

    #[command(flatten)]
    pub redis: RedisConfig,

    /// Internal health/status port for this worker process.
    #[arg(long, env = "WORKER_PORT", default_value_t = 8801)]
    pub port: u16,

    #[arg(long, value_enum, default_value_t = Accelerator::Auto)]
    pub accelerator: Accelerator,

    /// How many worker loops to run per selected device.
    #[arg(long, default_value_t = 1)]
    pub workers_per_device: u32,

    /// Comma-separated device indices to bind to, e.g. "0,1,3". Read from
    /// WORKER_GPUS when not given on the command line.
    #[arg(long, env = "WORKER_GPUS", value_delimiter = ',')]
    pub devices: Vec<u32>,

    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub poll_interval: std::time::Duration,

    /// Start the process without entering the claim/poll loop; useful for
    /// running only the health endpoint, or for tests that drive dispatch
    /// directly.
    #[arg(long, default_value_t = false)]
    pub disable_worker_loop: bool,
}

fn parse_duration(s: &str) -> Result<std::time::Duration, String> {
    let s = s.trim();
    let (number, suffix) = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|idx| s.split_at(idx))
        .unwrap_or((s, "s"));
    let value: f64 = number.parse().map_err(|_| format!("invalid duration: {s}"))?;
    let secs = match suffix {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        other => return Err(format!("unknown duration suffix: {other}")),
    };
    Ok(std::time::Duration::from_secs_f64(secs))
}
