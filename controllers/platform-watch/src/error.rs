//! Controller-specific error types.

use platform_owner::PlatformError;
use thiserror::Error;
use watch_cache::WatchCacheError;

/// Errors that can occur in the Platform Watch Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Watch registration failed
    #[error("Watch cache error: {0}")]
    WatchCache(#[from] WatchCacheError),

    /// Platform owner lookup failed
    #[error("Platform owner error: {0}")]
    Platform(#[from] PlatformError),

    /// No platform owner object exists in the cluster
    #[error("No platform owner found in the cluster")]
    NoPlatformOwner,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
