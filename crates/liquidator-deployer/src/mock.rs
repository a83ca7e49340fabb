//! In-memory deployer for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::Deployer;
use crate::error::{DeployerError, DeployerResult};

/// Counts instances in memory and records every call.
#[derive(Debug, Default)]
pub struct MockDeployer {
    role: String,
    count: AtomicUsize,
    deploying: AtomicBool,
    failing_counts: AtomicBool,
    increases: AtomicUsize,
    decreases: AtomicUsize,
    removals: AtomicUsize,
}

impl MockDeployer {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            ..Default::default()
        }
    }

    /// Start with `count` instances already running.
    pub fn with_count(role: &str, count: usize) -> Self {
        let mock = Self::new(role);
        mock.count.store(count, Ordering::SeqCst);
        mock
    }

    /// Pretend a change is (or is no longer) converging.
    pub fn set_deploying(&self, deploying: bool) {
        self.deploying.store(deploying, Ordering::SeqCst);
    }

    /// Make [`Deployer::count`] fail.
    pub fn fail_counts(&self, fail: bool) {
        self.failing_counts.store(fail, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn increase_calls(&self) -> usize {
        self.increases.load(Ordering::SeqCst)
    }

    pub fn decrease_calls(&self) -> usize {
        self.decreases.load(Ordering::SeqCst)
    }

    pub fn remove_all_calls(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    fn role(&self) -> &str {
        &self.role
    }

    async fn increase(&self) -> DeployerResult<()> {
        self.increases.fetch_add(1, Ordering::SeqCst);
        if !self.deploying.load(Ordering::SeqCst) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn decrease(&self) -> DeployerResult<()> {
        self.decreases.fetch_add(1, Ordering::SeqCst);
        if !self.deploying.load(Ordering::SeqCst) {
            let _ = self
                .count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
        Ok(())
    }

    async fn remove_all(&self) -> DeployerResult<()> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.count.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn count(&self) -> DeployerResult<usize> {
        if self.failing_counts.load(Ordering::SeqCst) {
            return Err(DeployerError::Backend("count unavailable".to_string()));
        }
        Ok(self.current())
    }

    async fn is_deploying(&self) -> bool {
        self.deploying.load(Ordering::SeqCst)
    }
}
