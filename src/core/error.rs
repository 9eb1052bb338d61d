use super::types::CollectionPhase;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Conflicting remote write: {0}")]
    Conflict(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Collection is not ready for mutations (phase: {0})")]
    NotReady(CollectionPhase),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// True for failures raised by the remote store rather than local checks.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_) | Self::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::RemoteUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::RemoteUnavailable(format!("invalid response body: {}", err))
    }
}
