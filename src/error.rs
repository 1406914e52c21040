use thiserror::Error;

use crate::types::AttemptId;

/// Errors returned to dispatch callers.
///
/// Failures of individual deliveries are never reported here; they live in
/// the delivery log.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Bad or missing input. Caller retries with corrected input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Registry or log store unreachable. No deliveries were attempted.
    #[error("dependency unavailable: {0}")]
    Dependency(#[from] StoreError),

    /// Replay requested for an attempt that was never logged.
    #[error("delivery attempt not found: {0}")]
    UnknownAttempt(AttemptId),

    /// Replay target no longer exists or has been deactivated.
    #[error("subscription {0} is missing or inactive")]
    InactiveSubscription(String),
}

/// Errors raised by registry and log store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed stored record: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Errors returned by the insight aggregator.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("invalid period {0:?}, expected \"<days>d\"")]
    InvalidPeriod(String),

    #[error("deal source unavailable: {0}")]
    Dependency(#[from] StoreError),
}
