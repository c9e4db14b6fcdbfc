use std::path::{Path, PathBuf};

use serde_json::Value;

const OFFICE_EXTENSIONS: &[&str] = &["doc", "docx", "ppt", "pptx", "xls", "xlsx"];

/// Converts an office document to PDF and guarantees the converted file is
/// removed once the caller is done with it, on every exit path — including
/// an error returned from further down the pipeline — via `Drop` rather
/// than mirrored cleanup calls on each branch.
pub struct ConvertedPdfGuard {
    path: PathBuf,
    disarmed: bool,
}

impl ConvertedPdfGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the converted file instead of deleting it on drop. Not used by
    /// the default pipeline, but available for callers who want to persist
    /// the intermediate PDF.
    pub fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for ConvertedPdfGuard {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove converted pdf");
            }
        }
    }
}

fn is_office_extension(file_path: &Path) -> bool {
    file_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| OFFICE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// When `options.force_mineru` is set and the input is an office document,
/// converts it to PDF via an external converter and returns a guard whose
/// `path()` should be used in place of the original file for the rest of
/// the pipeline. Returns `None` when no conversion is needed.
pub async fn maybe_convert_office_to_pdf(
    file_path: &Path,
    output_dir: &Path,
    options: &Value,
) -> anyhow::Result<Option<ConvertedPdfGuard>> {
    let force_mineru = options
        .get("force_mineru")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !force_mineru || !is_office_extension(file_path) {
        return Ok(None);
    }

    tokio::fs::create_dir_all(output_dir).await?;
    let converted = output_dir.join("converted.pdf");

    let status = tokio::process::Command::new("docflow-office-convert")
        .arg("--input")
        .arg(file_path)
        .arg("--output")
        .arg(&converted)
        .status()
        .await?;

    if !status.success() {
        anyhow::bail!("office conversion exited with {status}");
    }

    Ok(Some(ConvertedPdfGuard {
        path: converted,
        disarmed: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_deletes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("converted.pdf");
        std::fs::write(&path, b"fake pdf").unwrap();

        {
            let _guard = ConvertedPdfGuard {
                path: path.clone(),
                disarmed: false,
            };
        }
        assert!(!path.exists());
    }

    #[test]
    fn disarmed_guard_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("converted.pdf");
        std::fs::write(&path, b"fake pdf").unwrap();

        {
            let mut guard = ConvertedPdfGuard {
                path: path.clone(),
                disarmed: false,
            };
            guard.disarm();
        }
        assert!(path.exists());
    }
}
