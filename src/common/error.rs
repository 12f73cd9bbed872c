use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("No face detected")]
    NoFaceDetected,

    #[error("Failed to encode face")]
    NoEncoding,

    #[error("Extractor error: {0}")]
    Extractor(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl GateError {
    /// Status class reported to service clients.
    pub fn status(&self) -> u16 {
        match self {
            GateError::InvalidEmbedding(_)
            | GateError::InvalidUserId(_)
            | GateError::InvalidImage(_)
            | GateError::NoFaceDetected
            | GateError::NoEncoding
            | GateError::Protocol(_) => 400,
            GateError::InvalidToken(_) => 401,
            _ => 500,
        }
    }
}

impl From<bincode::Error> for GateError {
    fn from(e: bincode::Error) -> Self {
        GateError::Protocol(format!("bincode: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
