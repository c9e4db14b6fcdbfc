use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine {engine} does not support this input: {reason}")]
    Unsupported { engine: &'static str, reason: String },

    #[error("engine {engine} failed: {source}")]
    Failed {
        engine: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl From<EngineError> for docflow_core::CoreError {
    fn from(err: EngineError) -> Self {
        docflow_core::CoreError::EngineFailure(err.to_string())
    }
}

/// One registered extraction backend. `supports` answers whether this
/// engine can take the given file for `auto` dispatch; `parse` performs the
/// (blocking, external-process) extraction into `output_dir`.
#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, file_path: &Path, backend: &str) -> bool;

    /// File extensions this engine claims, for the static half of the
    /// engine catalog endpoint. Informational only; `supports` is still the
    /// source of truth for dispatch.
    fn extensions(&self) -> &[&'static str] {
        &[]
    }

    /// `device` is the GPU index the calling worker is bound to, or `None`
    /// for a CPU-bound worker. Implementations that shell out to an
    /// external process use it to scope the child's visible-device
    /// environment knob so the child addresses its one GPU as device 0,
    /// regardless of how many other devices the host has.
    async fn parse(
        &self,
        file_path: &Path,
        output_dir: &Path,
        options: &Value,
        device: Option<u32>,
    ) -> Result<(), EngineError>;
}
