use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::{Engine, EngineError};

/// Every built-in engine shells out to an independently-configured external
/// command and waits for it to write `output_dir`; this repo does not
/// embed a model runtime (see the crate-level scope note). What varies
/// between `pipeline`, `sensevoice`, `video`, a domain-format engine, or
/// the office/text fallback is only which extensions it claims and which
/// program it runs — so one generic type drives all of them, configured at
/// registration time rather than duplicated per engine.
pub struct ExternalCommandEngine {
    name: &'static str,
    extensions: Vec<&'static str>,
    program: String,
    extra_args: Vec<String>,
}

impl ExternalCommandEngine {
    pub fn new(
        name: &'static str,
        extensions: Vec<&'static str>,
        program: impl Into<String>,
    ) -> Self {
        Self {
            name,
            extensions,
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn matches_extension(&self, file_path: &Path) -> bool {
        file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Engine for ExternalCommandEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, file_path: &Path, backend: &str) -> bool {
        if backend != "auto" && backend != self.name {
            return false;
        }
        self.matches_extension(file_path)
    }

    fn extensions(&self) -> &[&'static str] {
        &self.extensions
    }

    async fn parse(
        &self,
        file_path: &Path,
        output_dir: &Path,
        options: &Value,
        device: Option<u32>,
    ) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| EngineError::Failed {
                engine: self.name,
                source: e.into(),
            })?;

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("--input")
            .arg(file_path)
            .arg("--output")
            .arg(output_dir)
            .args(&self.extra_args);
        if let Some(lang) = options.get("lang").and_then(|v| v.as_str()) {
            cmd.arg("--lang").arg(lang);
        }
        if let Some(endpoint) = options.get("paddleocr_vllm_endpoint").and_then(|v| v.as_str()) {
            cmd.arg("--endpoint").arg(endpoint);
        }
        // Scopes the child's visible-device set to exactly this GPU, set
        // before the child ever loads a compute library so it always
        // addresses its one device as device 0.
        if let Some(index) = device {
            cmd.env("CUDA_VISIBLE_DEVICES", index.to_string());
        }

        let name = self.name;
        let status = cmd.status().await.map_err(|e| EngineError::Failed {
            engine: name,
            source: e.into(),
        })?;

        if !status.success() {
            return Err(EngineError::Failed {
                engine: name,
                source: anyhow::anyhow!("command exited with {status}"),
            });
        }
        Ok(())
    }
}

/// The built-in roster, in the order `auto` dispatch tries them: domain
/// formats first, then audio, then video, then the pdf/image pipeline,
/// then the office/text fallback.
pub fn default_registry(binaries: &EngineBinaries) -> crate::registry::EngineRegistry {
    crate::registry::EngineRegistry::builder()
        .register(Arc::new(ExternalCommandEngine::new(
            "domain-format",
            vec!["dwg", "dxf", "step", "stp"],
            binaries.domain_format.clone(),
        )))
        .register(Arc::new(ExternalCommandEngine::new(
            "sensevoice",
            vec!["wav", "mp3", "m4a", "flac"],
            binaries.sensevoice.clone(),
        )))
        .register(Arc::new(ExternalCommandEngine::new(
            "video",
            vec!["mp4", "mkv", "mov", "avi"],
            binaries.video.clone(),
        )))
        .register(Arc::new(ExternalCommandEngine::new(
            "pipeline",
            vec!["pdf", "png", "jpg", "jpeg", "tiff", "bmp"],
            binaries.pipeline.clone(),
        )))
        .register(Arc::new(ExternalCommandEngine::new(
            "paddleocr-vl",
            vec!["pdf", "png", "jpg", "jpeg"],
            binaries.paddleocr_vl.clone(),
        )))
        .register(Arc::new(ExternalCommandEngine::new(
            "paddleocr-vl-vllm",
            vec!["pdf", "png", "jpg", "jpeg"],
            binaries.paddleocr_vl_vllm.clone(),
        )))
        .register(Arc::new(ExternalCommandEngine::new(
            "office-text",
            vec!["doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "md"],
            binaries.office_text.clone(),
        )))
        .build()
}

/// Paths of the external commands each built-in engine shells out to;
/// configurable so a deployment can point at wherever it installed the
/// real extraction tooling.
#[derive(Debug, Clone)]
pub struct EngineBinaries {
    pub domain_format: String,
    pub sensevoice: String,
    pub video: String,
    pub pipeline: String,
    pub paddleocr_vl: String,
    pub paddleocr_vl_vllm: String,
    pub office_text: String,
}

impl Default for EngineBinaries {
    fn default() -> Self {
        Self {
            domain_format: "docflow-engine-domain".into(),
            sensevoice: "docflow-engine-sensevoice".into(),
            video: "docflow-engine-video".into(),
            pipeline: "docflow-engine-pipeline".into(),
            paddleocr_vl: "docflow-engine-paddleocr-vl".into(),
            paddleocr_vl_vllm: "docflow-engine-paddleocr-vl-vllm".into(),
            office_text: "docflow-engine-office-text".into(),
        }
    }
}
