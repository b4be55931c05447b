//! Shared storage backends and the bucket state store.

mod backend;
mod bucket;
mod memory;
mod mutex;
mod redis;

pub use backend::StorageBackend;
pub use bucket::BucketStore;
pub use memory::MemoryBackend;
pub use mutex::{DistributedMutex, MutexGuard};
pub use redis::RedisBackend;
