use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PupilError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Index {index} out of range for {len} records")]
    OutOfRange { index: usize, len: usize },

    #[error("File not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Corrupt data in {}: {details}", path.display())]
    CorruptData { path: PathBuf, details: String },

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Protocol violation on '{topic}': {details}")]
    ProtocolViolation { topic: String, details: String },

    #[error("No eye video found for eye {eye_id}")]
    MissingSource { eye_id: u8 },

    #[error("Event bus error: {0}")]
    Bus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },
}

impl PupilError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn corrupt<P: Into<PathBuf>, S: Into<String>>(path: P, details: S) -> Self {
        Self::CorruptData {
            path: path.into(),
            details: details.into(),
        }
    }

    pub fn protocol<T: Into<String>, S: Into<String>>(topic: T, details: S) -> Self {
        Self::ProtocolViolation {
            topic: topic.into(),
            details: details.into(),
        }
    }

    /// Errors that mean "there is no usable prior session" rather than a real failure
    pub fn is_recoverable_load(&self) -> bool {
        matches!(
            self,
            PupilError::NotFound { .. }
                | PupilError::CorruptData { .. }
                | PupilError::VersionMismatch { .. }
                | PupilError::Decode(_)
                | PupilError::Json(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {0} messages")]
    Lagged(u64),

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, PupilError>;
