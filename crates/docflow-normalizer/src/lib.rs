//! Unifies whatever layout an engine happened to produce into a fixed shape
//! (`result.md`, optional `result.json`, an `images/` directory) and,
//! optionally, uploads those images to an object store and rewrites every
//! reference to point at the returned URLs. Upload failure is never fatal:
//! the task still completes with local paths.

mod rewrite;
mod uploader;

pub use uploader::{DisabledUploader, ImageUploader};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const STANDARD_MARKDOWN_NAME: &str = "result.md";
pub const STANDARD_JSON_NAME: &str = "result.json";
pub const STANDARD_IMAGE_DIR: &str = "images";

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedOutput {
    pub markdown_file: Option<PathBuf>,
    pub json_file: Option<PathBuf>,
    pub image_dir: Option<PathBuf>,
    pub image_count: usize,
    pub upload_enabled: bool,
    pub images_uploaded: bool,
}

/// Renames whatever markdown/json/image layout an engine wrote into the
/// fixed names this repo standardizes on. Engines are free to have written
/// `output.md`, `page.md`, or any other name; the first markdown file found
/// (depth 1) becomes `result.md`, the first JSON becomes `result.json`, and
/// every file under an existing `images/`-like directory (or loose image
/// files at the top level) is relocated under `images/`.
pub async fn normalize_local_files(output_dir: &Path) -> anyhow::Result<NormalizedOutput> {
    let mut result = NormalizedOutput::default();
    let mut entries = tokio::fs::read_dir(output_dir).await?;

    let mut markdown_candidate: Option<PathBuf> = None;
    let mut json_candidate: Option<PathBuf> = None;
    let mut loose_images: Vec<PathBuf> = Vec::new();
    let mut existing_image_dir: Option<PathBuf> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            let name = entry.file_name();
            if name == STANDARD_IMAGE_DIR || name.to_string_lossy().contains("image") {
                existing_image_dir = Some(path);
            }
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("md") if markdown_candidate.is_none() => markdown_candidate = Some(path),
            Some("json") if json_candidate.is_none() => json_candidate = Some(path),
            Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp") => loose_images.push(path),
            _ => {}
        }
    }

    let images_dir = output_dir.join(STANDARD_IMAGE_DIR);

    if let Some(existing) = existing_image_dir {
        if existing != images_dir {
            tokio::fs::create_dir_all(&images_dir).await?;
            relocate_dir_contents(&existing, &images_dir).await?;
            tokio::fs::remove_dir_all(&existing).await.ok();
        }
    } else if !loose_images.is_empty() {
        tokio::fs::create_dir_all(&images_dir).await?;
        for img in &loose_images {
            if let Some(name) = img.file_name() {
                tokio::fs::rename(img, images_dir.join(name)).await?;
            }
        }
    }

    if images_dir.exists() {
        let mut count = 0usize;
        let mut reader = tokio::fs::read_dir(&images_dir).await?;
        while reader.next_entry().await?.is_some() {
            count += 1;
        }
        if count > 0 {
            result.image_dir = Some(images_dir);
            result.image_count = count;
        }
    }

    if let Some(md) = markdown_candidate {
        let target = output_dir.join(STANDARD_MARKDOWN_NAME);
        if md != target {
            tokio::fs::rename(&md, &target).await?;
        }
        result.markdown_file = Some(target);
    }

    if let Some(json) = json_candidate {
        let target = output_dir.join(STANDARD_JSON_NAME);
        if json != target {
            tokio::fs::rename(&json, &target).await?;
        }
        result.json_file = Some(target);
    }

    Ok(result)
}

async fn relocate_dir_contents(from: &Path, to: &Path) -> anyhow::Result<()> {
    let mut reader = tokio::fs::read_dir(from).await?;
    while let Some(entry) = reader.next_entry().await? {
        let dest = to.join(entry.file_name());
        tokio::fs::rename(entry.path(), dest).await?;
    }
    Ok(())
}

/// The template method: normalize local files, then (if an uploader is
/// supplied and enabled) upload images and rewrite references. Returns the
/// same `result` either way; `images_uploaded` tells the caller whether the
/// rewrite happened so the task row's flag can be set.
pub async fn normalize(
    output_dir: &Path,
    uploader: Option<&dyn ImageUploader>,
) -> anyhow::Result<NormalizedOutput> {
    if !output_dir.exists() {
        anyhow::bail!("output directory does not exist: {}", output_dir.display());
    }

    tracing::info!(dir = %output_dir.display(), "normalizing output directory");
    let mut result = normalize_local_files(output_dir).await?;

    let Some(uploader) = uploader else {
        return Ok(result);
    };
    let Some(image_dir) = result.image_dir.clone() else {
        return Ok(result);
    };
    if result.image_count == 0 {
        return Ok(result);
    }

    result.upload_enabled = true;
    match uploader.upload_directory(&image_dir).await {
        Ok(mapping) if !mapping.is_empty() => {
            if let Some(md) = &result.markdown_file {
                if let Err(err) = rewrite::replace_markdown_urls(md, &mapping).await {
                    tracing::error!(error = %err, "failed to rewrite markdown image urls");
                    return Ok(result);
                }
            }
            if let Some(json) = &result.json_file {
                if let Err(err) = rewrite::replace_json_urls(json, &mapping).await {
                    tracing::error!(error = %err, "failed to rewrite json image urls");
                    return Ok(result);
                }
            }
            result.images_uploaded = true;
            tracing::info!(uploaded = mapping.len(), total = result.image_count, "uploaded images");
        }
        Ok(_) => {
            tracing::warn!("no images uploaded: empty url mapping");
        }
        Err(err) => {
            tracing::error!(error = %err, "image upload failed, continuing with local paths");
        }
    }

    Ok(result)
}

pub(crate) type UrlMapping = HashMap<String, String>;
