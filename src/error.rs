//! Error types for lesion segmentation operations

use std::time::Duration;
use thiserror::Error;

/// Result type alias for lesion segmentation operations
pub type Result<T> = std::result::Result<T, LesionSegError>;

/// Error taxonomy for the segmentation pipeline
///
/// Every failure is local to the operation that raised it. The processor only
/// commits new state after a whole cycle succeeded, so none of these leave a
/// probability map or overlay half-updated.
#[derive(Error, Debug)]
pub enum LesionSegError {
    /// No compute backend could load the model; inference is disabled for the session
    #[error("No inference backend available: {0}")]
    BackendUnavailable(String),

    /// Selected image could not be decoded or has degenerate dimensions
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A backend call failed after initialization succeeded
    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    /// A backend call did not finish within the configured timeout
    #[error("Inference timed out after {timeout_ms}ms ({attempts} attempt(s))")]
    InferenceTimeout { timeout_ms: u64, attempts: u32 },

    /// Asset could be served neither from cache nor from network
    #[error("Failed to fetch asset '{url}': {reason}")]
    AssetFetchFailure { url: String, reason: String },

    /// Rendering or export was requested before any successful inference
    #[error("No prediction available; process an image first")]
    NoPrediction,

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors for configs and cache metadata
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LesionSegError {
    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn invalid_image<S: Into<String>>(msg: S) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceFailure(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an asset fetch failure for the given URL
    pub fn asset_fetch<U: Into<String>, R: std::fmt::Display>(url: U, reason: R) -> Self {
        Self::AssetFetchFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error from the configured duration and attempt count
    #[must_use]
    pub fn timeout(timeout: Duration, attempts: u32) -> Self {
        Self::InferenceTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            attempts,
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }
}
