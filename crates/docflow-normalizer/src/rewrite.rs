use std::path::Path;

use regex::Regex;

use crate::{UrlMapping, STANDARD_IMAGE_DIR};

/// Rewrites every reference to an uploaded image in a markdown file.
/// Markdown-form references are always converted to an HTML `<img>` tag
/// (never left as markdown syntax, so downstream renderers see one
/// consistent form); HTML-form references have only their `src` attribute
/// replaced, preserving any other attributes.
pub async fn replace_markdown_urls(md_file: &Path, mapping: &UrlMapping) -> anyhow::Result<()> {
    let original = tokio::fs::read_to_string(md_file).await?;
    let mut content = original.clone();

    for (filename, url) in mapping {
        let escaped = regex::escape(filename);

        let markdown_pattern =
            Regex::new(&format!(r"!\[(.*?)\]\({}/{}\)", STANDARD_IMAGE_DIR, escaped))?;
        content = markdown_pattern
            .replace_all(&content, |caps: &regex::Captures| {
                let alt = caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty()).unwrap_or(filename);
                format!(r#"<img src="{url}" alt="{alt}">"#)
            })
            .into_owned();

        let html_pattern = Regex::new(&format!(
            r#"(<img[^>]*?)src=["']{}/{}["']([^>]*?>)"#,
            STANDARD_IMAGE_DIR, escaped
        ))?;
        content = html_pattern
            .replace_all(&content, |caps: &regex::Captures| {
                format!(r#"{}src="{}"{}"#, &caps[1], url, &caps[2])
            })
            .into_owned();
    }

    if content != original {
        tokio::fs::write(md_file, content).await?;
    }
    Ok(())
}

/// Recursively walks a JSON document; any string value containing both the
/// `images/` segment and a known uploaded filename is wholesale-replaced by
/// that file's URL. This is a substring heuristic, not a path match — it
/// mirrors the original normalizer rather than requiring an exact path.
pub async fn replace_json_urls(json_file: &Path, mapping: &UrlMapping) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(json_file).await?;
    let mut value: serde_json::Value = serde_json::from_str(&raw)?;
    replace_in_value(&mut value, mapping);
    let rewritten = serde_json::to_string_pretty(&value)?;
    tokio::fs::write(json_file, rewritten).await?;
    Ok(())
}

fn replace_in_value(value: &mut serde_json::Value, mapping: &UrlMapping) {
    match value {
        serde_json::Value::Object(map) => {
            for (_key, v) in map.iter_mut() {
                if let serde_json::Value::String(s) = v {
                    if let Some(url) = matching_url(s, mapping) {
                        *v = serde_json::Value::String(url);
                        continue;
                    }
                }
                replace_in_value(v, mapping);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                replace_in_value(item, mapping);
            }
        }
        _ => {}
    }
}

fn matching_url(value: &str, mapping: &UrlMapping) -> Option<String> {
    if !value.contains(STANDARD_IMAGE_DIR) {
        return None;
    }
    mapping
        .iter()
        .find(|(filename, _)| value.contains(filename.as_str()))
        .map(|(_, url)| url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn markdown_image_becomes_html_img() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("result.md");
        tokio::fs::write(&md, "before ![a figure](images/fig1.png) after")
            .await
            .unwrap();

        let mut mapping = HashMap::new();
        mapping.insert("fig1.png".to_string(), "https://cdn.example/fig1.png".to_string());

        replace_markdown_urls(&md, &mapping).await.unwrap();
        let content = tokio::fs::read_to_string(&md).await.unwrap();
        assert_eq!(
            content,
            r#"before <img src="https://cdn.example/fig1.png" alt="a figure"> after"#
        );
    }

    #[tokio::test]
    async fn html_img_src_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("result.md");
        tokio::fs::write(&md, r#"<img src="images/fig1.png" width="200">"#)
            .await
            .unwrap();

        let mut mapping = HashMap::new();
        mapping.insert("fig1.png".to_string(), "https://cdn.example/fig1.png".to_string());

        replace_markdown_urls(&md, &mapping).await.unwrap();
        let content = tokio::fs::read_to_string(&md).await.unwrap();
        assert_eq!(content, r#"<img src="https://cdn.example/fig1.png" width="200">"#);
    }

    #[tokio::test]
    async fn json_substring_heuristic_replaces_whole_value() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("result.json");
        tokio::fs::write(
            &json,
            serde_json::json!({"pages": [{"image_path": "images/fig1.png"}]}).to_string(),
        )
        .await
        .unwrap();

        let mut mapping = HashMap::new();
        mapping.insert("fig1.png".to_string(), "https://cdn.example/fig1.png".to_string());

        replace_json_urls(&json, &mapping).await.unwrap();
        let content = tokio::fs::read_to_string(&json).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["pages"][0]["image_path"], "https://cdn.example/fig1.png");
    }
}
