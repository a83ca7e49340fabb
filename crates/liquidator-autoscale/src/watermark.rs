//! Queue-watermark scaler with hysteresis.

use std::sync::Arc;

use async_trait::async_trait;
use liquidator_deployer::Deployer;
use liquidator_store::Queue;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ScalerError, ScalerResult};
use crate::{ScaleDirection, ScaleOutcome, Scaler};

/// Bounds for a [`QueueWatermark`] scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkConfig {
    /// Queue depth at or below which the role is over-provisioned.
    pub low: usize,
    /// Queue depth at or above which the role is under-provisioned.
    pub high: usize,
    pub min_instances: usize,
    /// `None` leaves scale-up unbounded.
    pub max_instances: Option<usize>,
    /// Consecutive breaches required before acting.
    pub violation_cap: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            low: 0,
            high: 1,
            min_instances: 1,
            max_instances: None,
            violation_cap: 3,
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> ScalerResult<()> {
        if self.high <= self.low {
            return Err(ScalerError::InvalidConfig(format!(
                "high watermark {} must be larger than low watermark {}",
                self.high, self.low
            )));
        }
        if let Some(max) = self.max_instances
            && self.min_instances > max
        {
            return Err(ScalerError::InvalidConfig(format!(
                "minimum instances {} exceed maximum {max}",
                self.min_instances
            )));
        }
        if self.violation_cap == 0 {
            return Err(ScalerError::InvalidConfig(
                "violation cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Hysteresis {
    low_violations: u32,
    high_violations: u32,
}

/// Scales a role's deployer from the depth of the queue it consumes.
pub struct QueueWatermark {
    queue: Arc<dyn Queue>,
    queue_name: String,
    deployer: Arc<dyn Deployer>,
    config: WatermarkConfig,
    /// Lowered to zero by `scale_to_zero`.
    min_instances: Mutex<usize>,
    hysteresis: Mutex<Hysteresis>,
}

impl QueueWatermark {
    pub fn new(
        queue: Arc<dyn Queue>,
        queue_name: &str,
        deployer: Arc<dyn Deployer>,
        config: WatermarkConfig,
    ) -> ScalerResult<Self> {
        if queue_name.trim().is_empty() {
            return Err(ScalerError::InvalidConfig(
                "queue name must not be blank".to_string(),
            ));
        }
        config.validate()?;

        Ok(Self {
            queue,
            queue_name: queue_name.to_string(),
            deployer,
            min_instances: Mutex::new(config.min_instances),
            config,
            hysteresis: Mutex::new(Hysteresis::default()),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Current (low, high) violation counters.
    pub async fn violations(&self) -> (u32, u32) {
        let h = self.hysteresis.lock().await;
        (h.low_violations, h.high_violations)
    }
}

#[async_trait]
impl Scaler for QueueWatermark {
    fn role(&self) -> &str {
        self.deployer.role()
    }

    async fn scale_automatic(&self) -> ScalerResult<ScaleOutcome> {
        let role = self.deployer.role();
        debug!(role, queue = %self.queue_name, "checking scaling parameters");

        if self.deployer.is_deploying().await {
            warn!(role, "still deploying, skipping scale check");
            return Ok(ScaleOutcome::NONE);
        }

        let min = *self.min_instances.lock().await;
        if min > 0 {
            let running = self.deployer.count().await?;
            if running < min {
                info!(role, running, min, "below minimum instances");
                let scaled = self.scale_up().await?;
                return Ok(ScaleOutcome {
                    direction: ScaleDirection::Up,
                    scaled,
                });
            }
        }

        let depth = self.queue.count_items(&self.queue_name).await?;
        debug!(role, queue = %self.queue_name, depth, "checked queue size");

        let cap = self.config.violation_cap;
        let direction = {
            let mut h = self.hysteresis.lock().await;
            if depth <= self.config.low {
                h.low_violations += 1;
                debug!(role, violations = h.low_violations, cap, "low watermark breached");
                if h.low_violations >= cap {
                    h.low_violations = 0;
                    ScaleDirection::Down
                } else {
                    ScaleDirection::None
                }
            } else if depth >= self.config.high {
                h.high_violations += 1;
                debug!(role, violations = h.high_violations, cap, "high watermark breached");
                if h.high_violations >= cap {
                    h.high_violations = 0;
                    ScaleDirection::Up
                } else {
                    ScaleDirection::None
                }
            } else {
                ScaleDirection::None
            }
        };

        let scaled = match direction {
            ScaleDirection::Up => self.scale_up().await?,
            ScaleDirection::Down => self.scale_down().await?,
            ScaleDirection::None => false,
        };
        Ok(ScaleOutcome { direction, scaled })
    }

    async fn scale_up(&self) -> ScalerResult<bool> {
        let role = self.deployer.role();
        if let Some(max) = self.config.max_instances {
            let running = self.deployer.count().await?;
            if running + 1 > max {
                debug!(role, running, max, "refusing to scale above maximum");
                return Ok(false);
            }
        }
        self.deployer.increase().await?;
        Ok(true)
    }

    async fn scale_down(&self) -> ScalerResult<bool> {
        let role = self.deployer.role();
        let running = self.deployer.count().await?;
        let min = *self.min_instances.lock().await;
        if running == 0 || running - 1 < min {
            debug!(role, running, min, "refusing to scale below minimum");
            return Ok(false);
        }
        self.deployer.decrease().await?;
        Ok(true)
    }

    async fn scale_to_zero(&self) -> ScalerResult<()> {
        *self.min_instances.lock().await = 0;
        self.deployer.remove_all().await?;
        info!(role = self.deployer.role(), "scaled to zero");
        Ok(())
    }

    async fn count(&self) -> ScalerResult<usize> {
        Ok(self.deployer.count().await?)
    }
}
