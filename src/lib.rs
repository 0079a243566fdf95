//! # tidepool
//!
//! Asynchronous object pool for expensive-to-create resources (database
//! connections, sockets, file handles, large buffers). Borrowers acquire
//! a [`PooledRef`], use it, and release it; the pool amortizes
//! allocation, enforces an upper bound on concurrent usage, evicts
//! unhealthy resources, and resets resources between uses.
//!
//! ```rust,no_run
//! use tidepool::{Order, PoolBuilder};
//!
//! # async fn example() -> tidepool::Result<()> {
//! let pool = PoolBuilder::from(|| async { Ok(Connection::open().await?) })
//!     .size_max(16)
//!     .initial_size(2)
//!     .order(Order::Lifo)
//!     .release_handler(|conn: &mut Connection| Box::pin(async move { conn.reset().await }))
//!     .build()
//!     .await?;
//!
//! let conn = pool.acquire().await?;
//! // ... use *conn ...
//! conn.release().await?;
//! # Ok(())
//! # }
//! # struct Connection;
//! # impl Connection {
//! #     async fn open() -> std::result::Result<Self, tidepool::BoxError> { Ok(Self) }
//! #     async fn reset(&mut self) -> std::result::Result<(), tidepool::BoxError> { Ok(()) }
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod slot;
pub mod testing;

mod idle;
mod pending;

pub use config::{AllocFuture, HandlerFuture, Order, PoolBuilder, PoolConfig};
pub use error::{BoxError, Error, Result};
pub use metrics::{MetricsRecorder, NoopRecorder, PoolMetrics};
pub use pool::Pool;
pub use slot::{PooledRef, RefMetadata};

#[cfg(feature = "metrics")]
pub use metrics::TelemetryRecorder;
