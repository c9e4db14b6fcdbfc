use thiserror::Error;

/// The error taxonomy shared by every layer. Each crate boundary maps its own
/// internal errors onto this enum; the API edge maps it onto an HTTP status.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("conflicting state: {0}")]
    ConflictState(String),

    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] anyhow::Error),

    #[error("upload failure: {0}")]
    UploadFailure(String),
}

impl CoreError {
    pub fn status_label(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::ValidationFailure(_) => "validation_failure",
            CoreError::ConflictState(_) => "conflict_state",
            CoreError::EngineFailure(_) => "engine_failure",
            CoreError::StorageFailure(_) => "storage_failure",
            CoreError::UploadFailure(_) => "upload_failure",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
