//! Metrics cache: numeric counters shared between the workers and the
//! manager.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Reply timeout for cache commands.
pub const CACHE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Numeric key/value cache.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn connect(&self) -> StoreResult<()>;

    /// Overwrite the value at `key`.
    async fn set(&self, key: &str, value: f64) -> StoreResult<()>;

    /// Read the value at `key`; a missing key reads as `0.0`.
    async fn get_f64(&self, key: &str) -> StoreResult<f64>;

    /// Read the value at `key` and remove it in one step, so increments
    /// made concurrently land in the next read. A missing key reads as `0.0`.
    async fn take_f64(&self, key: &str) -> StoreResult<f64>;

    /// Atomically add `delta` to the integer at `key`.
    async fn increment_by(&self, key: &str, delta: i64) -> StoreResult<()>;

    /// Remove `key`. Used to clear per-block counters.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn disconnect(&self) -> StoreResult<()>;
}

/// Redis string-key cache.
pub struct RedisCache {
    client: redis::Client,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisCache {
    pub fn new(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: RwLock::new(None),
        })
    }

    async fn conn(&self) -> StoreResult<ConnectionManager> {
        self.conn.read().await.clone().ok_or(StoreError::NotConnected)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn connect(&self) -> StoreResult<()> {
        let mut guard = self.conn.write().await;
        if guard.is_none() {
            let config =
                ConnectionManagerConfig::new().set_response_timeout(Some(CACHE_RESPONSE_TIMEOUT));
            *guard = Some(ConnectionManager::new_with_config(self.client.clone(), config).await?);
            info!("cache connected");
        }
        Ok(())
    }

    async fn set(&self, key: &str, value: f64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn get_f64(&self, key: &str) -> StoreResult<f64> {
        let mut conn = self.conn().await?;
        let value: Option<f64> = conn.get(key).await?;
        Ok(value.unwrap_or(0.0))
    }

    async fn take_f64(&self, key: &str) -> StoreResult<f64> {
        let mut conn = self.conn().await?;
        let value: Option<f64> = conn.get_del(key).await?;
        Ok(value.unwrap_or(0.0))
    }

    async fn increment_by(&self, key: &str, delta: i64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.incr(key, delta).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        if self.conn.write().await.take().is_some() {
            info!("cache disconnected");
        }
        Ok(())
    }
}
