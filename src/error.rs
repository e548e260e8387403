use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Dataset not found: {access_id}")]
    DatasetNotFound { access_id: String },

    #[error("Staging failed: {message}")]
    Staging { message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StagingError {
    pub fn staging(message: impl Into<String>) -> Self {
        StagingError::Staging {
            message: message.into(),
        }
    }
}
