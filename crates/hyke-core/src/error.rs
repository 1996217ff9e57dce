//! Error types for the Hyke status engine.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, HykeError>;

#[derive(Debug, Error)]
pub enum HykeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("email error: {0}")]
    Email(String),

    /// An external collaborator (survey, NPS, folder service) failed.
    #[error("service error: {0}")]
    Service(String),

    /// A record's free-form data could not be parsed.
    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A handler failed and the scheduler was told to stop the batch.
    #[error("dispatch aborted at record {record_id} ({process}): {reason}")]
    Dispatch {
        record_id: i64,
        process: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HykeError {
    pub fn database(e: impl std::fmt::Display) -> Self {
        Self::Database(e.to_string())
    }
}
