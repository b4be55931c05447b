//! Error types for the Floodgate limiters.

use thiserror::Error;

/// Distinguishes an immediate denial from one that occurred after a blocking
/// wait exhausted its timeout. Both route to the same caller-visible fallback
/// path, but observability wants them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    /// The limit was hit and no waiting was requested.
    Immediate,
    /// The blocking timeout elapsed without the limit opening up.
    Timeout,
}

impl std::fmt::Display for DenialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialKind::Immediate => write!(f, "immediate"),
            DenialKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Main error type for Floodgate operations.
///
/// Infrastructure errors (`StorageUnavailable`, `StorageCorrupt`) indicate the
/// shared coordination substrate is impaired and are never retried internally.
/// `RateLimitExceeded` and `WorkerLimitExceeded` are logical denials, the
/// expected outcome of contention.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// The shared store could not be reached or refused an operation.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The shared store returned a value that cannot be decoded.
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// Invalid limiter parameters or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested backend pool is not registered.
    #[error("unknown pool: {0}")]
    UnknownPool(String),

    /// The token bucket for `name` denied the consume.
    #[error("rate limit exceeded for {name}")]
    RateLimitExceeded { name: String, kind: DenialKind },

    /// All worker slots for `name` are held.
    #[error("worker limit exceeded for {name}")]
    WorkerLimitExceeded { name: String, kind: DenialKind },
}

impl FloodgateError {
    /// Whether this error is a logical denial rather than an infrastructure
    /// failure. Only denials are routed to caller fallbacks.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            FloodgateError::RateLimitExceeded { .. } | FloodgateError::WorkerLimitExceeded { .. }
        )
    }
}

impl From<redis::RedisError> for FloodgateError {
    fn from(err: redis::RedisError) -> Self {
        FloodgateError::StorageUnavailable(err.to_string())
    }
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denials_are_denials() {
        let err = FloodgateError::RateLimitExceeded {
            name: "api".to_string(),
            kind: DenialKind::Immediate,
        };
        assert!(err.is_denial());

        let err = FloodgateError::WorkerLimitExceeded {
            name: "api".to_string(),
            kind: DenialKind::Timeout,
        };
        assert!(err.is_denial());
    }

    #[test]
    fn test_infrastructure_errors_are_not_denials() {
        assert!(!FloodgateError::StorageUnavailable("down".to_string()).is_denial());
        assert!(!FloodgateError::StorageCorrupt("bad bytes".to_string()).is_denial());
    }

    #[test]
    fn test_error_message_names_the_resource() {
        let err = FloodgateError::RateLimitExceeded {
            name: "checkout".to_string(),
            kind: DenialKind::Immediate,
        };
        assert!(err.to_string().contains("checkout"));
    }
}
