//! Error types for batched loading.

use std::sync::Arc;

use crate::kind::EntityKind;

/// Failure reported by a [`BatchFetcher`](crate::BatchFetcher).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The persistence layer failed the query.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The fetcher did not answer in time.
    #[error("Fetch timed out after {0}ms")]
    Timeout(u64),

    /// No fetcher handles this entity kind.
    #[error("No fetcher registered for {0}")]
    Unsupported(EntityKind),
}

impl FetchError {
    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Error returned from [`Loader::load`](crate::Loader::load).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The batch containing the key failed. Every caller of that batch sees the same error.
    #[error("Batch fetch failed: {0}")]
    BatchFetchFailed(Arc<FetchError>),

    /// The owning request was torn down before the batch resolved.
    #[error("Load cancelled")]
    Cancelled,
}

impl LoadError {
    /// Returns the error code used in logs and API error extensions.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BatchFetchFailed(_) => "BATCH_FETCH_FAILED",
            Self::Cancelled => "LOAD_CANCELLED",
        }
    }
}

/// Errors from loading or validating [`Settings`](crate::Settings).
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from starting the data layer.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Cache(#[from] jobquest_cache::CacheError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_fetch_error() {
        let err = LoadError::BatchFetchFailed(Arc::new(FetchError::backend("connection reset")));
        let cloned = err.clone();
        assert_eq!(cloned.to_string(), "Batch fetch failed: Backend error: connection reset");
        assert_eq!(err.error_code(), "BATCH_FETCH_FAILED");
        assert_eq!(LoadError::Cancelled.error_code(), "LOAD_CANCELLED");
    }
}
