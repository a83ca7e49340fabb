//! liquidator-autoscale: keeps each worker role's instance count matched
//! to its queue backlog.
//!
//! One [`Scaler`] exists per worker role. The manager calls
//! [`Scaler::scale_automatic`] once per block; the scaler reads its
//! queue depth and its deployer's instance count and moves the count by
//! at most one instance.
//!
//! # Watermark algorithm
//!
//! ```text
//! if deployer busy:                       None
//! if running < min_instances:             Up (immediately)
//! depth = queue length
//! if depth <= low:   low_violations += 1;  at cap -> reset, Down
//! if depth >= high:  high_violations += 1; at cap -> reset, Up
//! otherwise:         counters unchanged
//! ```
//!
//! `Down` is refused when it would cross `min_instances` and `Up` when it
//! would cross `max_instances`. Refusals are successful no-ops.

pub mod error;
pub mod watermark;

use std::fmt;

use async_trait::async_trait;

pub use error::{ScalerError, ScalerResult};
pub use watermark::{QueueWatermark, WatermarkConfig};

/// Direction a scale evaluation decided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    None,
    Up,
    Down,
}

impl ScaleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleDirection::None => "none",
            ScaleDirection::Up => "up",
            ScaleDirection::Down => "down",
        }
    }
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one [`Scaler::scale_automatic`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleOutcome {
    pub direction: ScaleDirection,
    /// True when the deployer was actually asked to change.
    pub scaled: bool,
}

impl ScaleOutcome {
    pub const NONE: ScaleOutcome = ScaleOutcome {
        direction: ScaleDirection::None,
        scaled: false,
    };
}

/// Scaling policy for one worker role.
#[async_trait]
pub trait Scaler: Send + Sync {
    /// The worker role this scaler manages.
    fn role(&self) -> &str;

    /// Evaluate the role's backlog and scale by at most one instance.
    async fn scale_automatic(&self) -> ScalerResult<ScaleOutcome>;

    /// Add one instance unless the maximum would be exceeded. Returns
    /// whether the deployer was asked to change.
    async fn scale_up(&self) -> ScalerResult<bool>;

    /// Remove one instance unless the minimum would be crossed. Returns
    /// whether the deployer was asked to change.
    async fn scale_down(&self) -> ScalerResult<bool>;

    /// Drop the minimum to zero and remove every instance.
    async fn scale_to_zero(&self) -> ScalerResult<()>;

    /// Instances currently running for this role.
    async fn count(&self) -> ScalerResult<usize>;
}
