use thiserror::Error;

use crate::types::InstanceId;

pub type RosterSyncResult<T> = Result<T, RosterSyncError>;

#[derive(Debug, Error)]
pub enum RosterSyncError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Roster source error: {status} - {message}")]
    SourceApiError { status: u16, message: String },

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Invalid course selection key: {0}")]
    InvalidSelectionKey(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Server error: {0}")]
    ServerError(String)
}

impl RosterSyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::DatabaseError(_) => true,
            Self::SourceApiError { status, .. } => *status >= 500,
            _ => false
        }
    }
}
