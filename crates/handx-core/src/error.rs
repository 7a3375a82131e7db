use thiserror::Error;

/// Errors produced by the handx protocol and transport layers.
#[derive(Debug, Error)]
pub enum HandxError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for HandxError {
    fn from(e: serde_json::Error) -> Self {
        HandxError::Codec(e.to_string())
    }
}

pub type HandxResult<T> = Result<T, HandxError>;
