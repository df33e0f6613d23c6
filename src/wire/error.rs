//! Wire protocol error types.

use thiserror::Error;

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("message body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: u64, max: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True when the peer closed the stream cleanly between two frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
