//! liquidator-core: shared types for the liquidation pipeline.
//!
//! Every worker role and the orchestration manager agree on these types:
//!
//! - [`WorkItem`]: one page of contract storage for a scanner to read,
//!   serialized as JSON onto the scanner queue
//! - [`NewBlockEvent`]: a confirmed block observed on the chain
//! - [`Metric`]: a single gauge value tagged with its chain
//! - [`WorkerRole`]: the horizontally scaled services the manager owns
//! - [`keys`]: cache key names shared between the workers and the manager

pub mod error;
pub mod keys;
pub mod types;

pub use error::CoreError;
pub use types::*;
