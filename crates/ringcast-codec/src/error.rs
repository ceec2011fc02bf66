use ringcast_core::error::CoreError;
use thiserror::Error;

/// Errors returned by token/message/frame codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// CBOR serialization failure.
    #[error("encode error: {0}")]
    Encode(String),
    /// CBOR deserialization failure.
    #[error("decode error: {0}")]
    Decode(String),
    /// Token-level schema validation failure.
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),
    /// Message-level schema validation failure.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    #[error(transparent)]
    Core(#[from] CoreError),
}
