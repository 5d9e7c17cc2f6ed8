//! Platform owner errors

use thiserror::Error;

/// Errors that can occur while resolving a cluster's platform owner
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The requested owner object does not exist
    #[error("Platform owner not found: {0}")]
    NotFound(String),
}
