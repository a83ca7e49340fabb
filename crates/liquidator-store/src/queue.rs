//! Work queues: FIFO lists addressed by key.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Items per RPUSH when pushing in bulk.
pub const PUSH_CHUNK_SIZE: usize = 100;

/// Time allowed for a reply on top of the BLPOP timeout. The client-side
/// response timeout must outlast the server-side block.
const RESPONSE_GRACE: Duration = Duration::from_secs(2);

/// A set of named FIFO queues.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Establish (or verify) the connection to the backing store.
    async fn connect(&self) -> StoreResult<()>;

    /// Append one item to the tail of `key`.
    async fn push(&self, key: &str, item: &[u8]) -> StoreResult<()>;

    /// Append many items to the tail of `key`, in chunks of [`PUSH_CHUNK_SIZE`].
    async fn push_many(&self, key: &str, items: &[Vec<u8>]) -> StoreResult<()>;

    /// Pop the head of `key`, waiting up to the queue's pop timeout.
    ///
    /// Returns `None` when nothing arrived in time.
    async fn fetch(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Pop up to `count` items from the head of `key` without waiting.
    async fn fetch_many(&self, key: &str, count: usize) -> StoreResult<Vec<Vec<u8>>>;

    /// Number of items currently in `key`.
    async fn count_items(&self, key: &str) -> StoreResult<usize>;

    /// Remove every item in `key`.
    async fn purge(&self, key: &str) -> StoreResult<()>;

    /// Drop the connection.
    async fn disconnect(&self) -> StoreResult<()>;
}

/// Redis LIST-backed queue.
pub struct RedisQueue {
    client: redis::Client,
    conn: RwLock<Option<ConnectionManager>>,
    /// How long BLPOP waits before giving up.
    pop_timeout: Duration,
}

impl RedisQueue {
    /// Create a queue for the given connection URL. No connection is made
    /// until [`Queue::connect`] is called.
    pub fn new(url: &str, pop_timeout: Duration) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: RwLock::new(None),
            pop_timeout,
        })
    }

    async fn conn(&self) -> StoreResult<ConnectionManager> {
        self.conn.read().await.clone().ok_or(StoreError::NotConnected)
    }

    fn response_timeout(&self) -> Duration {
        self.pop_timeout + RESPONSE_GRACE
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn connect(&self) -> StoreResult<()> {
        let mut guard = self.conn.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let config = ConnectionManagerConfig::new().set_response_timeout(Some(self.response_timeout()));
        let manager = ConnectionManager::new_with_config(self.client.clone(), config).await?;
        *guard = Some(manager);
        info!("queue connected");
        Ok(())
    }

    async fn push(&self, key: &str, item: &[u8]) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.rpush(key, item).await?;
        Ok(())
    }

    async fn push_many(&self, key: &str, items: &[Vec<u8>]) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        for chunk in items.chunks(PUSH_CHUNK_SIZE) {
            let _: i64 = conn.rpush(key, chunk).await?;
        }
        debug!(%key, items = items.len(), "pushed batch");
        Ok(())
    }

    async fn fetch(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        // BLPOP replies with [key, value] or nil on timeout.
        let reply: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(self.pop_timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|(_, value)| value))
    }

    async fn fetch_many(&self, key: &str, count: usize) -> StoreResult<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Option<Vec<Vec<u8>>> = redis::cmd("LPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(values.unwrap_or_default())
    }

    async fn count_items(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    async fn purge(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        if self.conn.write().await.take().is_some() {
            info!("queue disconnected");
        }
        Ok(())
    }
}
