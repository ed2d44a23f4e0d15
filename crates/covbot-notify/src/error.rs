use thiserror::Error;

use covbot_db::DbError;

/// Failures that abort a whole comparison event. Per-channel failures are
/// recorded on the delivery status instead and never surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid comparison payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] DbError),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0}")]
    InvalidService(String),

    #[error("Could not find repository {owner}/{repo}. Please make sure the repository exists and you have access to it.")]
    RepositoryNotFound { owner: String, repo: String },

    #[error("reporting api unavailable: {0:#}")]
    Reporting(anyhow::Error),

    #[error(transparent)]
    Store(#[from] DbError),
}
