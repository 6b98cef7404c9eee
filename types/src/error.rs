use thiserror::Error;

/// Errors raised when constructing core types from external input.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
