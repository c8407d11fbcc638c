use thiserror::Error;

/// Errors raised by workflow state backends.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("corrupt workflow record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
