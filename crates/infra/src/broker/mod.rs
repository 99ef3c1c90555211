//! Redis-backed broker implementations.
//!
//! The broker contracts live in `hhrec-events` as pure mechanics. This module
//! maps them onto Redis:
//!
//! - work queue and dead-letter queue: Redis Streams with one consumer group
//! - fan-out result exchange: Redis pub/sub channel

#[cfg(feature = "redis")]
pub mod redis_pubsub;
#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_pubsub::RedisResultChannel;
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBroker, RedisStreamsConnection};
