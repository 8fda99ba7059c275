//! Error types for the wavetrace library.

use thiserror::Error;

/// Main error type for wavetrace operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A buffer accessor was called before `set_work_buffer_size`
    #[error("Work buffers are not allocated; call set_work_buffer_size first")]
    WorkBufferNotAllocated,

    /// Estimate or trace requested more slots than were allocated
    #[error("Requested {requested} ray slots but work buffers hold {capacity}")]
    WorkBufferTooSmall { requested: usize, capacity: usize },

    /// Device allocation refused
    #[error("Allocation of {requested} bytes failed (device limit: {limit} bytes)")]
    AllocationFailed { requested: usize, limit: usize },

    /// Estimator construction rejected its kernel configuration
    #[error("Kernel build failed: {0}")]
    KernelBuild(String),

    /// Optional capability not provided by this estimator
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Scene description is inconsistent
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// Caller passed an out-of-range argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encoding error
    #[cfg(feature = "image")]
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid scene error.
    pub fn invalid_scene(msg: impl Into<String>) -> Self {
        Self::InvalidScene(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Result type alias for wavetrace operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::WorkBufferNotAllocated;
        assert!(e.to_string().contains("set_work_buffer_size"));

        let e = Error::WorkBufferTooSmall { requested: 5, capacity: 3 };
        assert!(e.to_string().contains("5"));
        assert!(e.to_string().contains("3"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
