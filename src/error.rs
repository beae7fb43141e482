//! Error handling for the maintainer tools
//!
//! Library modules return [`Result`] over [`ToolsError`]. Module-local error
//! types (command execution, debdiff parsing, size parsing) convert into it so
//! `?` works across module boundaries.

use thiserror::Error;

use crate::command_runner::ExecError;
use crate::debdiff::DebdiffError;
use crate::timelapse::SizeError;

/// Main error type for the maintainer tools
#[derive(Error, Debug)]
pub enum ToolsError {
    /// IO errors (files, pipes, directories)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Affectedness database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// APT lists or Release files that cannot be parsed
    #[error("Debian metadata error: {0}")]
    Debian(#[from] debian_packaging::error::DebianError),

    /// Invalid package or section filter
    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    /// External program could not be run or timed out
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// External program ran but reported failure
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (user input, parsed data)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Package name not present in the database
    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    #[error(transparent)]
    Debdiff(#[from] DebdiffError),

    #[error(transparent)]
    Size(#[from] SizeError),

    /// Image header could not be read
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the maintainer tools
pub type Result<T> = std::result::Result<T, ToolsError>;

impl ToolsError {
    /// Create a command failure error
    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::CommandFailed(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
