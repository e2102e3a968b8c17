use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] resio_engine::FetchError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}

impl From<resio_engine::EngineError> for AppError {
    fn from(error: resio_engine::EngineError) -> Self {
        let (source, _) = error.into_parts();
        AppError::Fetch(source)
    }
}
