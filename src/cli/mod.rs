// CLI support for the ferrotag binary

pub mod commands;
pub mod output;

pub use output::{OutputFormat, OutputFormatter};

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub enum CliError {
    FileNotFound(String),
    InvalidArgument(String),
    Io(std::io::Error),
    Parse(String),
    Tag(ferrotag::TagError),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::FileNotFound(path) => write!(f, "File not found: {path}"),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
            CliError::Parse(msg) => write!(f, "Parse error: {msg}"),
            CliError::Tag(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Parse(e.to_string())
    }
}

impl From<ferrotag::TagError> for CliError {
    fn from(e: ferrotag::TagError) -> Self {
        CliError::Tag(e)
    }
}
