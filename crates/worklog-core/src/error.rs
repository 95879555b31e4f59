//! Error types for log extraction

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an extraction.
///
/// Everything else (unparsable lines, orphan markers, malformed blocks) is
/// recovered inside the session and surfaces only in
/// [`ExtractionDiagnostics`](crate::ExtractionDiagnostics).
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The log source could not be opened
    #[error("Log source unavailable: {path}: {source}")]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The log source was opened but reading from it failed
    #[error("Failed to read log source: {0}")]
    Read(#[from] std::io::Error),
}

/// Result type for extraction operations
pub type Result<T> = std::result::Result<T, ExtractError>;
