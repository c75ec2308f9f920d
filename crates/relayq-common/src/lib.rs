//! # RelayQ Common
//!
//! Shared types, errors, and protocol constants used by RelayQ nodes.
//!
//! ## Modules
//! - `types` - Core data structures (Item, QueueSnapshot, NodeRole, etc.)
//! - `error` - Request-scoped queue errors and their HTTP mapping
//! - `constants` - Defaults, route paths, and websocket protocol strings

pub mod constants;
pub mod error;
pub mod types;

pub use error::QueueError;
pub use types::*;
