//! liquidator-store: work queues and the metrics cache.
//!
//! Both capabilities are backed by a Redis-compatible store in production
//! and by in-memory doubles in tests.
//!
//! # Architecture
//!
//! ```text
//! Queue (trait)                    Cache (trait)
//!   ├── RedisQueue  (LIST keys)      ├── RedisCache  (string keys)
//!   └── MemoryQueue                  └── MemoryCache
//! ```
//!
//! Queues are addressed by key, so one connection serves every worker
//! role's queue. An empty non-blocking fetch is not an error: it returns
//! `None` or an empty `Vec`.

pub mod cache;
pub mod error;
pub mod memory;
pub mod queue;

pub use cache::{Cache, RedisCache};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryCache, MemoryQueue};
pub use queue::{Queue, RedisQueue, PUSH_CHUNK_SIZE};

/// Build a connection URL from a `host:port` endpoint and database index.
///
/// Endpoints that already carry a scheme are used as given.
pub fn redis_url(endpoint: &str, database: i64) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("redis://{endpoint}/{database}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_from_host_port() {
        assert_eq!(redis_url("localhost:6379", 2), "redis://localhost:6379/2");
        assert_eq!(
            redis_url("rediss://cache.internal:6380/4", 0),
            "rediss://cache.internal:6380/4"
        );
    }
}
