use std::time::Duration;

use thiserror::Error;

/// The main error type of the storage core.
///
/// Redis operations are never retried here; retry policy belongs to the
/// caller. The two watchers log per-cycle failures and try again on their
/// next tick instead of propagating them.
#[derive(Error, Debug)]
pub enum CinderError {
    /// Empty or out-of-range input. Raised synchronously, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Redis transport or protocol error.
    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    /// A connection could not be checked out of the pool.
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// The pool itself could not be constructed.
    #[error("redis pool setup error: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    /// A state-history entry could not be serialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A distributed lock was not acquired within its deadline. Watchers
    /// treat this as "another instance is handling it" and move on.
    #[error("could not acquire lock on {resource:?} within {timeout:?}")]
    LockTimeout { resource: String, timeout: Duration },

    /// The supplied cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Unusable storage configuration (missing or malformed Redis URL).
    #[error("configuration error: {0}")]
    Config(String),
}
