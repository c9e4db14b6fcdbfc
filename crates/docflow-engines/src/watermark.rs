use std::path::{Path, PathBuf};

use serde_json::Value;

/// Removes a watermark from a PDF when `options.remove_watermark` is set,
/// producing a cleaned copy alongside the original. Runs before any office
/// conversion so a watermarked office document converted to PDF is cleaned
/// exactly the same way a watermarked PDF upload would be.
pub async fn maybe_remove_watermark(
    file_path: &Path,
    output_dir: &Path,
    options: &Value,
) -> anyhow::Result<PathBuf> {
    let enabled = options
        .get("remove_watermark")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !enabled {
        return Ok(file_path.to_path_buf());
    }

    let conf_threshold = options
        .get("watermark_conf_threshold")
        .and_then(Value::as_f64)
        .unwrap_or(0.5);
    let dilation = options
        .get("watermark_dilation")
        .and_then(Value::as_u64)
        .unwrap_or(3);

    tokio::fs::create_dir_all(output_dir).await?;
    let cleaned = output_dir.join("watermark_removed.pdf");

    let status = tokio::process::Command::new("docflow-watermark-remove")
        .arg("--input")
        .arg(file_path)
        .arg("--output")
        .arg(&cleaned)
        .arg("--conf-threshold")
        .arg(conf_threshold.to_string())
        .arg("--dilation")
        .arg(dilation.to_string())
        .status()
        .await?;

    if !status.success() {
        anyhow::bail!("watermark removal exited with {status}");
    }
    Ok(cleaned)
}
