//! Error types for tile_trainer

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tiling, masking and corpus assembly.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed split parameters, shape mismatches or unusable inputs.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A strictly decoded mask image contains a color other than the reference color.
    #[error("Inconsistent mask: pixel ({row}, {col}) is {found}, expected {expected}")]
    InconsistentMask {
        row: usize,
        col: usize,
        found: String,
        expected: String,
    },

    /// An image path that does not decode to a valid image.
    #[error("Image not found or not decodable: {path}: {reason}")]
    NotFound { path: PathBuf, reason: String },

    /// A label folder whose name does not follow `<id>_<name>`.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

/// Result type alias for tile_trainer operations
pub type Result<T> = std::result::Result<T, Error>;
