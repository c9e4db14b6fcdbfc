use std::path::PathBuf;

use clap::Args;

/// Where the store and the task filesystem areas live. Shared by every
/// binary so the API and the worker agree on layout without a central
/// coordinator.
#[derive(Debug, Clone, Args)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[arg(long, env = "DATABASE_PATH", default_value = "./data/docflow.db")]
    pub database_path: PathBuf,

    /// Directory normalized task output is written to.
    #[arg(long = "output-dir", env = "OUTPUT_PATH", default_value = "./data/output")]
    pub output_path: PathBuf,

    /// Directory incoming uploads are staged in.
    #[arg(long, env = "UPLOAD_PATH", default_value = "./data/uploads")]
    pub upload_path: PathBuf,
}

impl StorageConfig {
    pub fn splits_dir(&self, parent_task_id: &str) -> PathBuf {
        self.output_path.join("splits").join(parent_task_id)
    }

    pub fn result_dir(&self, task_id: &str) -> PathBuf {
        self.output_path.join(task_id)
    }
}

/// PDF-splitting thresholds, read the same way on the worker that performs
/// the split.
#[derive(Debug, Clone, Args)]
pub struct SplitConfig {
    #[arg(long, env = "PDF_SPLIT_ENABLED", default_value_t = true)]
    pub pdf_split_enabled: bool,

    #[arg(long, env = "PDF_SPLIT_THRESHOLD_PAGES", default_value_t = 500)]
    pub pdf_split_threshold_pages: u32,

    #[arg(long, env = "PDF_SPLIT_CHUNK_SIZE", default_value_t = 500)]
    pub pdf_split_chunk_size: u32,
}

impl SplitConfig {
    pub fn shard_count(&self, total_pages: u32) -> u32 {
        total_pages.div_ceil(self.pdf_split_chunk_size)
    }

    pub fn should_split(&self, total_pages: u32) -> bool {
        self.pdf_split_enabled && total_pages > self.pdf_split_threshold_pages
    }
}

/// HTTP API process settings.
#[derive(Debug, Clone, Args)]
pub struct ApiConfig {
    #[arg(long, env = "API_PORT", default_value_t = 8800)]
    pub port: u16,

    /// Upload streaming chunk size, in bytes. The spec fixes this at 8 MiB
    /// to bound request-handling memory regardless of file size.
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub upload_chunk_bytes: usize,

    /// Request timeout applied to download-shaped operations (MCP upstream
    /// fetch). Engine invocation itself is deliberately unbounded.
    #[arg(long, default_value = "60s", value_parser = parse_duration)]
    pub download_timeout: std::time::Duration,
}

/// API-key / bearer-token principal resolution (see
/// `docflow_core::permission::resolve_principal`). Not a real identity
/// provider: out of scope per §1.
#[derive(Debug, Clone, Args)]
pub struct AuthConfig {
    #[arg(long, env = "ADMIN_API_KEYS", value_delimiter = ',')]
    pub admin_api_keys: Vec<String>,
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

/// Connection settings for the optional out-of-process priority queue.
#[derive(Debug, Clone, Args)]
pub struct RedisConfig {
    #[arg(long, env = "REDIS_QUEUE_ENABLED", default_value_t = false)]
    pub redis_queue_enabled: bool,

    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: u8,

    #[arg(long, env = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        match &self.redis_password {
            Some(pw) if !pw.is_empty() => format!(
                "redis://:{pw}@{host}:{port}/{db}",
                pw = pw,
                host = self.redis_host,
                port = self.redis_port,
                db = self.redis_db
            ),
            _ => format!(
                "redis://{host}:{port}/{db}",
                host = self.redis_host,
                port = self.redis_port,
                db = self.redis_db
            ),
        }
    }
}
