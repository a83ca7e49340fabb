//! In-memory queue and cache.
//!
//! Behave like their Redis counterparts within a single process. Both
//! support fault injection so callers can exercise their error paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::cache::Cache;
use crate::error::{StoreError, StoreResult};
use crate::queue::Queue;

// ── Queue ──────────────────────────────────────────────────────────

/// In-memory [`Queue`].
pub struct MemoryQueue {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    pushed: Notify,
    pop_timeout: Duration,
    /// Pushes remaining that should fail.
    failing_pushes: Mutex<usize>,
    /// Keys whose length cannot be read.
    uncountable: Mutex<HashSet<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_pop_timeout(Duration::from_millis(50))
    }

    pub fn with_pop_timeout(pop_timeout: Duration) -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
            pushed: Notify::new(),
            pop_timeout,
            failing_pushes: Mutex::new(0),
            uncountable: Mutex::new(HashSet::new()),
        }
    }

    /// Make the next `n` pushes fail.
    pub async fn fail_next_pushes(&self, n: usize) {
        *self.failing_pushes.lock().await = n;
    }

    /// Make [`Queue::count_items`] fail for `key`.
    pub async fn fail_counts_for(&self, key: &str) {
        self.uncountable.lock().await.insert(key.to_string());
    }

    /// Snapshot of the items in `key`, head first.
    pub async fn items(&self, key: &str) -> Vec<Vec<u8>> {
        self.lists
            .lock()
            .await
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn take_push_failure(&self) -> bool {
        let mut remaining = self.failing_pushes.lock().await;
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }

    async fn pop_front(&self, key: &str) -> Option<Vec<u8>> {
        self.lists.lock().await.get_mut(key)?.pop_front()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn connect(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn push(&self, key: &str, item: &[u8]) -> StoreResult<()> {
        if self.take_push_failure().await {
            return Err(StoreError::Unavailable(format!("push to {key} rejected")));
        }
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(item.to_vec());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn push_many(&self, key: &str, items: &[Vec<u8>]) -> StoreResult<()> {
        if self.take_push_failure().await {
            return Err(StoreError::Unavailable(format!("push to {key} rejected")));
        }
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .extend(items.iter().cloned());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn fetch(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let deadline = tokio::time::Instant::now() + self.pop_timeout;
        loop {
            let notified = self.pushed.notified();
            if let Some(item) = self.pop_front(key).await {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn fetch_many(&self, key: &str, count: usize) -> StoreResult<Vec<Vec<u8>>> {
        let mut lists = self.lists.lock().await;
        let Some(list) = lists.get_mut(key) else {
            return Ok(Vec::new());
        };
        let take = count.min(list.len());
        Ok(list.drain(..take).collect())
    }

    async fn count_items(&self, key: &str) -> StoreResult<usize> {
        if self.uncountable.lock().await.contains(key) {
            return Err(StoreError::Unavailable(format!("length of {key} unavailable")));
        }
        Ok(self.lists.lock().await.get(key).map_or(0, VecDeque::len))
    }

    async fn purge(&self, key: &str) -> StoreResult<()> {
        self.lists.lock().await.remove(key);
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        Ok(())
    }
}

// ── Cache ──────────────────────────────────────────────────────────

/// In-memory [`Cache`].
#[derive(Default)]
pub struct MemoryCache {
    values: Mutex<HashMap<String, f64>>,
    /// Keys whose reads fail.
    unreadable: Mutex<HashSet<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads of `key` fail.
    pub async fn fail_reads_for(&self, key: &str) {
        self.unreadable.lock().await.insert(key.to_string());
    }

    /// Whether `key` currently holds a value.
    pub async fn contains(&self, key: &str) -> bool {
        self.values.lock().await.contains_key(key)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn connect(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn set(&self, key: &str, value: f64) -> StoreResult<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_f64(&self, key: &str) -> StoreResult<f64> {
        if self.unreadable.lock().await.contains(key) {
            return Err(StoreError::Unavailable(format!("read of {key} failed")));
        }
        Ok(self.values.lock().await.get(key).copied().unwrap_or(0.0))
    }

    async fn take_f64(&self, key: &str) -> StoreResult<f64> {
        if self.unreadable.lock().await.contains(key) {
            return Err(StoreError::Unavailable(format!("read of {key} failed")));
        }
        Ok(self.values.lock().await.remove(key).unwrap_or(0.0))
    }

    async fn increment_by(&self, key: &str, delta: i64) -> StoreResult<()> {
        *self.values.lock().await.entry(key.to_string()).or_insert(0.0) += delta as f64;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purge_empties_queue() {
        let queue = MemoryQueue::new();
        queue.push("scanner", b"a").await.unwrap();
        queue.push("scanner", b"b").await.unwrap();
        assert_eq!(queue.count_items("scanner").await.unwrap(), 2);

        queue.purge("scanner").await.unwrap();
        assert_eq!(queue.count_items("scanner").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fetch_is_fifo_and_times_out_empty() {
        let queue = MemoryQueue::new();
        queue
            .push_many("q", &[b"1".to_vec(), b"2".to_vec()])
            .await
            .unwrap();

        assert_eq!(queue.fetch("q").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(queue.fetch("q").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(queue.fetch("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fetch_wakes_on_push() {
        let queue = std::sync::Arc::new(MemoryQueue::with_pop_timeout(Duration::from_secs(5)));
        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push("q", b"late").await.unwrap();
        });

        assert_eq!(queue.fetch("q").await.unwrap(), Some(b"late".to_vec()));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn fetch_many_on_empty_key_is_not_an_error() {
        let queue = MemoryQueue::new();
        assert!(queue.fetch_many("missing", 10).await.unwrap().is_empty());

        queue
            .push_many("q", &[b"1".to_vec(), b"2".to_vec(), b"3".to_vec()])
            .await
            .unwrap();
        assert_eq!(queue.fetch_many("q", 2).await.unwrap().len(), 2);
        assert_eq!(queue.count_items("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn injected_push_failures_are_consumed() {
        let queue = MemoryQueue::new();
        queue.fail_next_pushes(1).await;
        assert!(queue.push("q", b"x").await.is_err());
        assert!(queue.push("q", b"y").await.is_ok());
        assert_eq!(queue.items("q").await, vec![b"y".to_vec()]);
    }

    #[tokio::test]
    async fn cache_missing_key_reads_zero() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get_f64("nothing").await.unwrap(), 0.0);

        cache.increment_by("counter", 3).await.unwrap();
        cache.increment_by("counter", 4).await.unwrap();
        assert_eq!(cache.get_f64("counter").await.unwrap(), 7.0);

        cache.delete("counter").await.unwrap();
        assert!(!cache.contains("counter").await);
        assert_eq!(cache.get_f64("counter").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn take_reads_and_clears() {
        let cache = MemoryCache::new();
        cache.increment_by("scanned", 40).await.unwrap();

        assert_eq!(cache.take_f64("scanned").await.unwrap(), 40.0);
        assert!(!cache.contains("scanned").await);

        // Increments after the take start a fresh count.
        cache.increment_by("scanned", 2).await.unwrap();
        assert_eq!(cache.take_f64("scanned").await.unwrap(), 2.0);
        assert_eq!(cache.take_f64("scanned").await.unwrap(), 0.0);
    }
}
