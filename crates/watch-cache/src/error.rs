//! Watch cache errors

use thiserror::Error;

/// Errors that can occur while registering watches
#[derive(Debug, Error)]
pub enum WatchCacheError {
    /// The caller supplied an unusable object or configuration
    /// (e.g., a namespaced object without a namespace)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The object's kind or scope could not be resolved from discovery metadata
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A watch session could not be constructed, started or queried
    #[error("Watch session error: {0}")]
    Session(String),
}

impl WatchCacheError {
    /// Returns true for `InvalidArgument` errors
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Returns true for `Discovery` errors
    #[must_use]
    pub fn is_discovery(&self) -> bool {
        matches!(self, Self::Discovery(_))
    }

    /// Returns true for `Session` errors
    #[must_use]
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}
