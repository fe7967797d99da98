use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("source '{source_name}' returned malformed data: {reason}")]
    SourceData { source_name: String, reason: String },

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] pulse_db::DbError),

    #[error("no job found for topic '{0}'")]
    JobNotFound(String),

    #[error("job for topic '{0}' has not finished yet")]
    JobNotReady(String),

    #[error("job for topic '{0}' finished but its report could not be stored")]
    ReportNotPersisted(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
