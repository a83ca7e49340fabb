//! liquidator-dispatch: the orchestration manager.
//!
//! Turns each committed block into a fresh round of scanner work and
//! keeps every worker role sized to its backlog.
//!
//! # Architecture
//!
//! ```text
//!                 ┌── liveness monitor ─────┐ (fails after 60s without a block)
//!                 ├── storage size monitor ─┤ (writes total_items every 10s)
//!                 │                         ▼
//! BlockWatcher ──mpsc──▶ Manager::process_block ◀── RwLock<SharedState>
//!                             │
//!                             ├─ metrics for height-1 ──▶ MetricsReporter
//!                             ├─ Scaler::scale_automatic per role
//!                             ├─ purge scanner / health-check / executor queues
//!                             └─ partition(total, per_packet) ──push──▶ scanner queue
//! ```
//!
//! # Shutdown
//!
//! [`Manager::stop`] flips the shared `watch` flag, waits for a scaling
//! check in flight and scales every role to zero. The block reader, both
//! monitors and the metrics worker watch the same flag, and
//! [`Manager::run`] returns once they have finished. [`Manager::run_until`]
//! ties the two to a signal and returns only when both are done.

pub mod config;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod partition;

pub use config::{DEFAULT_LIVENESS_TIMEOUT, DEFAULT_MONITOR_INTERVAL, ManagerConfig};
pub use error::{ManagerError, ManagerResult};
pub use manager::{Manager, ScalerMap};
pub use monitor::SharedState;
pub use partition::partition;
