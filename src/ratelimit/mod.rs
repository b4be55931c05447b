//! Token-bucket rate limiting.

mod bucket;
mod limiter;
mod rate;

pub use bucket::{Decision, TokenBucket};
pub use limiter::{BucketPolicy, RateLimiter};
pub use rate::{Rate, TimeUnit};
