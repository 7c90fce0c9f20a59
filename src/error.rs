use thiserror::Error;

/// Error types for the room session server
#[derive(Debug, Error)]
pub enum SessionError {
    /// Identity errors
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Room document errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Submission {0} not found")]
    SubmissionNotFound(String),

    #[error("Question {0} not found")]
    QuestionNotFound(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Code agent errors
    #[error("code agent failure: {0}")]
    UpstreamFailure(String),

    /// Wire errors
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error class reported to clients and matched on by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    NotReady,
    UpstreamFailure,
    Conflict,
    Internal,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Unauthorized(_) => ErrorKind::Unauthorized,
            SessionError::Forbidden(_) => ErrorKind::Forbidden,
            SessionError::RoomNotFound(_)
            | SessionError::SubmissionNotFound(_)
            | SessionError::QuestionNotFound(_) => ErrorKind::NotFound,
            SessionError::NotReady(_) => ErrorKind::NotReady,
            SessionError::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            SessionError::Conflict(_) => ErrorKind::Conflict,
            SessionError::InvalidMessage(_)
            | SessionError::SerializationFailed(_)
            | SessionError::InvalidConfiguration(_)
            | SessionError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short message for the single error notice sent back to a connection.
    /// Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => match self {
                SessionError::InvalidMessage(_) => "malformed message".to_string(),
                _ => "internal server error".to_string(),
            },
            _ => self.to_string(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        SessionError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        SessionError::Forbidden(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        SessionError::UpstreamFailure(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SessionError::Internal(msg.into())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::UpstreamFailure("code agent request timed out".to_string())
        } else {
            SessionError::UpstreamFailure(err.to_string())
        }
    }
}
