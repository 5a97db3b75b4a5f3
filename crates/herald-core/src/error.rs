use thiserror::Error;

/// Errors produced by the herald protocol and server layers.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("session limit reached ({0})")]
    SessionLimit(usize),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for HeraldError {
    fn from(e: serde_json::Error) -> Self {
        HeraldError::Codec(e.to_string())
    }
}

pub type HeraldResult<T> = Result<T, HeraldError>;
