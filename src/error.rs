//! Error types for the depth_scene library.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding or decoding failed
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Camera rig file could not be read or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Two images that must share a format do not
    #[error("Image size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: String, actual: String },

    /// Camera slot outside the rig
    #[error("Camera index {0} out of range")]
    CameraIndex(usize),

    /// A persisted file exists but does not match the expected layout
    #[error("Format mismatch: {0}")]
    Format(String),

    /// Parameter file entry could not be parsed
    #[error("Parameter error: {0}")]
    Param(String),

    /// The navigation service task is no longer running
    #[error("Navigation service stopped")]
    ServiceClosed,
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
