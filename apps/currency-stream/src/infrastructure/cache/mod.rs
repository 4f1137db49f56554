//! Cache Backend Adapters
//!
//! Implementations of [`CacheBackend`](crate::application::ports::CacheBackend):
//!
//! - `MemoryCache`: in-process TTL map, used when no Redis URL is configured
//!   and in tests
//! - `RedisCache`: shared Redis instance through a reconnecting
//!   `ConnectionManager`

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
