//! Redis connectivity for the Redis Streams commit log backend.

pub mod pool;

pub use pool::{PoolError, RedisPool};
