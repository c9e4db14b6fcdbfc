use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

/// Uploads every file in a directory to an object store and returns a
/// `{filename -> url}` mapping. Implemented by a deployer for their own
/// object store; this crate only ships a disabled stub.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload_directory(&self, dir: &Path) -> anyhow::Result<HashMap<String, String>>;
}

/// The default uploader: image upload is off unless a deployer wires in a
/// real implementation. `normalize` treats an empty mapping the same as a
/// disabled uploader — local paths are kept, nothing is marked uploaded.
pub struct DisabledUploader;

#[async_trait]
impl ImageUploader for DisabledUploader {
    async fn upload_directory(&self, _dir: &Path) -> anyhow::Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}
