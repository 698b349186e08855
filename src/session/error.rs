use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Valid outcome for non-interactive environments, not a failure.
    #[error("Not attached to an interactive terminal")]
    NotInTerminal,

    #[error("Session storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Expected when fuzzy matching finds nothing above the threshold;
    /// detection falls through to creation.
    #[error("No recovery candidate above the confidence threshold")]
    NoRecoveryMatch,

    #[error("Session detection failed: {0}")]
    DetectionFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid time window: {0}")]
    InvalidWindow(String),
}

impl From<rusqlite::Error> for SessionError {
    fn from(err: rusqlite::Error) -> Self {
        SessionError::StorageUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
