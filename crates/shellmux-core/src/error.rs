use thiserror::Error;

/// Errors produced by the shellmux session layer and protocol.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("terminal not found: {0}")]
    TerminalNotFound(String),

    #[error("no active session on this connection")]
    NoSession,

    #[error("limit reached: {0}")]
    LimitReached(String),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for MuxError {
    fn from(e: serde_json::Error) -> Self {
        MuxError::Codec(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for MuxError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        MuxError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for MuxError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        MuxError::Codec(e.to_string())
    }
}

pub type MuxResult<T> = Result<T, MuxError>;
