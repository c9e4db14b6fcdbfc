use docflow_core::config::{AuthConfig, StorageConfig};
use docflow_service::AppState;

/// Everything an axum handler needs beyond what an extractor gives it. The
/// service layer (`AppState`) carries the store/queue/registry/uploader;
/// this wraps it with the bits that only the HTTP edge cares about.
#[derive(Clone)]
pub struct ApiState {
    pub service: AppState,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}
