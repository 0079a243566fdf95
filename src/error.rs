//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by user-supplied allocators and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pool operations
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// Operation attempted on (or racing with) a disposed pool
    #[error("pool has been shut down")]
    PoolShutDown,

    /// The pending acquire queue is at capacity
    #[error("pending acquire queue has reached its maximum size of {max}")]
    QueueFull {
        /// The configured `max_pending_acquire`
        max: usize,
    },

    /// A pending acquire outlived its configured timeout
    #[error("acquire has been pending for more than the configured timeout of {timeout:?}")]
    AcquireTimeout {
        /// The configured timeout
        timeout: Duration,
    },

    /// The user allocator failed
    #[error("allocator failed")]
    Allocator {
        /// The underlying error
        #[source]
        source: BoxError,
    },

    /// The release handler failed; the resource was destroyed instead of recycled
    #[error("release handler failed")]
    ReleaseHandler {
        /// The underlying error
        #[source]
        source: BoxError,
    },

    /// The destroy handler failed
    #[error("destroy handler failed")]
    DestroyHandler {
        /// The underlying error
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::AcquireTimeout { .. })
    }
}
