/// Errors from the log pipeline and its search backend.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("search backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timestamp formatting failed: {0}")]
    TimestampFormat(#[from] time::error::Format),

    #[error("search backend returned status {0}")]
    UnexpectedStatus(u16),

    #[error("bulk index had {failed} failed documents out of {total}")]
    BulkFailed { failed: usize, total: usize },
}
