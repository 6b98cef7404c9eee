use thiserror::Error;

/// Errors from wire decoding and framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated input")]
    Truncated,

    #[error("trailing bytes after item")]
    TrailingBytes,

    #[error("non-canonical integer encoding")]
    NonCanonicalInteger,

    #[error("integer wider than {0} bytes")]
    IntegerTooWide(usize),

    #[error("nesting depth exceeded")]
    DepthExceeded,

    #[error("declared length exceeds input")]
    LengthOverflow,

    #[error("expected {0}")]
    UnexpectedItem(&'static str),

    #[error("unknown message code {0:#04x}")]
    UnknownCode(u8),

    #[error("disallowed state in frame: {0}")]
    DisallowedState(&'static str),

    #[error("frame of {size} bytes exceeds limit {max}")]
    Oversized { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
