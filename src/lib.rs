//! Floodgate - Distributed Admission Control Primitives
//!
//! This crate implements two admission-control primitives shared across the
//! processes of a distributed service: a token-bucket rate limiter bounding
//! the rate of a named operation, and a worker concurrency limiter bounding
//! how many executions of it are in flight at once. Both are backed by a
//! shared Redis-like store, so every process pointing at the same pool
//! enforces one global limit per resource name.
//!
//! Bucket state is a single persisted timestamp from which the token count
//! is derived; mutation happens read-modify-write under a named distributed
//! mutex. Worker slots are leased keys claimed with atomic set-if-absent.
//! Neither limiter orders contending callers: a later caller may win
//! capacity freed before an earlier, longer-waiting one retries.
//!
//! ```no_run
//! use std::sync::Arc;
//! use floodgate::pool::PoolManager;
//! use floodgate::ratelimit::{BucketPolicy, RateLimiter};
//! use floodgate::storage::RedisBackend;
//!
//! # async fn example() -> floodgate::error::Result<()> {
//! let backend = RedisBackend::connect("redis://127.0.0.1:6379").await?;
//! let limiter = RateLimiter::new(PoolManager::single(Arc::new(backend)));
//!
//! let policy = BucketPolicy::new("checkout", 100);
//! limiter.consume(&policy).await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod pool;
pub mod ratelimit;
pub mod storage;
pub mod worker;

pub use error::{DenialKind, FloodgateError, Result};
pub use pool::PoolManager;
pub use ratelimit::{BucketPolicy, RateLimiter, TimeUnit};
pub use worker::{WorkerLimiter, WorkerPolicy};
