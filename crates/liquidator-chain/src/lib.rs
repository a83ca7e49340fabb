//! liquidator-chain: everything the manager reads from the chain.
//!
//! ```text
//! RPC websocket ──subscribe──▶ BlockWatcher ──mpsc──▶ NewBlockEvent
//! LCD REST ──state?count_total──▶ LcdStorage ──▶ total contract items
//! ```
//!
//! The block subscription is deliberately not resumable. A read or decode
//! failure ends the stream and the reader task returns the error, so the
//! process can exit and be restarted rather than silently skip blocks.

pub mod error;
pub mod rpc;
pub mod storage;
pub mod watcher;

pub use error::{ChainError, ChainResult};
pub use storage::{ContractStorage, LcdStorage, MemoryStorage};
pub use watcher::{BlockStream, BlockWatcher};
