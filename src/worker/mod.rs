//! Worker concurrency limiting.

mod limiter;
mod lock;

pub use limiter::{WorkerLimiter, WorkerPolicy};
pub use lock::{KeySlotLock, SlotLock, WorkerId};
