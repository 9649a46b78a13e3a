//! Error types for the cache layer.
//!
//! Only [`CacheError::MalformedKey`] ever reaches a caller of the
//! [`ProcessCache`](crate::ProcessCache): store outages and invalidation failures are
//! logged and absorbed, since the cache is an optimization and never a correctness
//! dependency.

use crate::store::StoreError;

/// Errors produced by the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A namespace, parameter name or identifier cannot form a valid key.
    ///
    /// This is a programmer error and is raised when the key is constructed.
    #[error("Malformed cache key: {reason}")]
    MalformedKey {
        /// What was wrong with the key material.
        reason: String,
    },

    /// The backing store could not be reached or rejected a command.
    #[error("Backing store unavailable: {0}")]
    BackingStoreUnavailable(#[from] StoreError),

    /// Namespace invalidation did not complete.
    #[error("Invalidation of namespace '{namespace}' failed: {source}")]
    InvalidationFailed {
        /// The namespace being invalidated.
        namespace: String,
        /// The underlying store failure.
        #[source]
        source: StoreError,
    },

    /// A cached payload could not be encoded or decoded.
    #[error("Cache payload error: {0}")]
    Payload(String),
}

impl CacheError {
    /// Creates a new `MalformedKey` error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedKey {
            reason: reason.into(),
        }
    }

    /// Returns the error code used in logs and health payloads.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedKey { .. } => "MALFORMED_CACHE_KEY",
            Self::BackingStoreUnavailable(_) => "BACKING_STORE_UNAVAILABLE",
            Self::InvalidationFailed { .. } => "INVALIDATION_FAILED",
            Self::Payload(_) => "CACHE_PAYLOAD_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CacheError::malformed("x").error_code(), "MALFORMED_CACHE_KEY");
        assert_eq!(
            CacheError::from(StoreError::Unavailable("down".into())).error_code(),
            "BACKING_STORE_UNAVAILABLE"
        );
        assert_eq!(
            CacheError::InvalidationFailed {
                namespace: "jobs".into(),
                source: StoreError::Command("boom".into()),
            }
            .error_code(),
            "INVALIDATION_FAILED"
        );
    }

    #[test]
    fn test_display() {
        let err = CacheError::malformed("empty namespace");
        assert_eq!(err.to_string(), "Malformed cache key: empty namespace");
    }
}
