//! Error types shared by all tag backends.

use thiserror::Error;

/// Errors that can occur while parsing or making tags.
#[derive(Error, Debug)]
pub enum TagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data ended before {context} was complete")]
    Truncated { context: &'static str },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("No valid MPEG frame sync found")]
    InvalidSync,

    #[error("Reserved value in {field}")]
    ReservedField { field: &'static str },

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("Unsupported handler type: {0:#018x}")]
    UnsupportedHandler(u64),

    #[error("Cannot convert tag value from {from} to {to}")]
    ConversionError {
        from: &'static str,
        to: &'static str,
    },

    #[error("Invalid UTF-8 in {context}")]
    BadUtf8 { context: &'static str },

    #[error("No tag found")]
    NoTag,
}

impl TagError {
    /// Whether this error must abort the whole operation rather than the
    /// current block. Only stream failures are unrecoverable; structural
    /// errors are confined to the block that produced them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TagError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, TagError>;
