//! Protocol decoding errors.

use thiserror::Error;

/// Errors produced while framing or parsing messages.
#[derive(Error, Debug)]
pub enum ProtocolError
{
    /// The header block did not contain a `Content-Length` field.
    #[error("Missing Content-Length header")]
    MissingContentLength,

    /// A header line could not be parsed.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The announced body exceeds [`MAX_FRAME_SIZE`](crate::MAX_FRAME_SIZE).
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The body is not a valid message.
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;
