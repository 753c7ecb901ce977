//! Protocol error types

use thiserror::Error;

/// Errors from encoding or decoding record frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame declares a length beyond the sanity cap
    #[error("frame of {got} bytes exceeds maximum of {max}")]
    FrameTooLarge { got: usize, max: usize },

    /// A string field is too long for its length prefix
    #[error("{field} of {len} bytes exceeds maximum of {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Frame body ended before all declared fields were read
    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    /// Unknown value tag byte
    #[error("unknown value tag: {0}")]
    BadValueTag(u8),

    /// Unknown quality tag byte
    #[error("unknown quality tag: {0}")]
    BadQuality(u8),

    /// String field is not valid UTF-8
    #[error("invalid UTF-8 in {field}")]
    Utf8 { field: &'static str },

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
