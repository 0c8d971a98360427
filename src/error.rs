//! Error types for Stratus
//!
//! All fallible operations in the crate return [`Result`], whose error type is
//! [`StratusError`].

use thiserror::Error;

/// Result type alias for Stratus operations
pub type Result<T> = std::result::Result<T, StratusError>;

/// Errors that can occur while loading models, configuring sessions, or
/// running inference
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StratusError {
    /// Invalid tensor shape
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Reason for invalidity
        reason: String,
    },

    /// Data size does not match the declared shape
    #[error("Data size {data_size} does not match shape {shape:?} (expected {expected})")]
    DataShapeMismatch {
        /// Actual number of elements
        data_size: usize,
        /// Declared shape
        shape: Vec<usize>,
        /// Number of elements implied by the shape
        expected: usize,
    },

    /// Element type of a value differs from what the model declares
    #[error("Type mismatch for '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Input or output name
        name: String,
        /// Declared element type
        expected: String,
        /// Provided element type
        actual: String,
    },

    /// Malformed model file or wire payload
    #[error("Format error: {reason}")]
    FormatError {
        /// What could not be decoded
        reason: String,
    },

    /// Filesystem failure
    #[error("I/O error: {message}")]
    IoError {
        /// Underlying error message
        message: String,
    },

    /// Model file does not exist
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Session or run configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation is not supported by this runtime
    #[error("Unsupported operation '{operation}': {reason}")]
    UnsupportedOperation {
        /// Operation name
        operation: String,
        /// Why it is unsupported
        reason: String,
    },

    /// Local or remote execution failed
    #[error("Inference error: {0}")]
    InferenceError(String),

    /// Network transport failure talking to a cloud endpoint
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Cloud endpoint answered with a non-success status
    #[error("HTTP {status} from {url}: {body}")]
    EndpointError {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
        /// Response body (may be empty)
        body: String,
    },
}

impl StratusError {
    /// Whether the endpoint rejected the credential (401/403)
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::EndpointError { status: 401 | 403, .. })
    }
}

impl From<std::io::Error> for StratusError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
        }
    }
}
