// src/error.rs

use thiserror::Error;

/// Core error types for modupdater
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local filesystem failure with path context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Download failed before any bytes could be verified
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Downloaded or cached bytes do not match the expected digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Malformed data (registry payloads, version labels)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Component could not be initialized (HTTP client, worker pool)
    #[error("Initialization error: {0}")]
    InitError(String),
}

impl Error {
    /// True for integrity failures the caller may retry by re-downloading
    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(self, Error::ChecksumMismatch { .. })
    }
}

/// Result type alias using modupdater's Error type
pub type Result<T> = std::result::Result<T, Error>;
