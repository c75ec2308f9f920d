//! Local queue state and the operations built on it.
//!
//! - `store` - FIFO with per-key uniqueness
//! - `subscribers` - websocket subscriber registry
//! - `service` - push / pull / subscribe orchestration

mod service;
mod store;
mod subscribers;

pub use service::QueueService;
