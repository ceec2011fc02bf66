use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Mode/flag bits outside the defined set.
    #[error("invalid mode bits: {0:#06x}")]
    InvalidModeBits(u16),
}
