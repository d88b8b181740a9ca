use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("EPUB parse error: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),
    #[error("Model service error: {0}")]
    ModelService(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Invalid range: {0}")]
    Range(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Failures caused by the request or a remote service rather than by
    /// local state. The rest point at a damaged index or a broken disk.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingService(_)
                | AppError::ModelService(_)
                | AppError::Timeout(_)
                | AppError::Range(_)
                | AppError::Validation(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Io(format!("Malformed record: {e}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;
