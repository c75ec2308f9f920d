//! Cluster coordination modules.
//!
//! Implements:
//! - Membership Gossip Protocol (UDP)
//! - Membership directory (read-only view, primary lookup)
//! - Best-effort replication and bootstrap over peer HTTP

mod gossip;
pub(crate) mod membership;
mod replication;

pub use gossip::{GossipConfig, GossipService, NodeDescriptor};
pub use membership::MembershipDirectory;
pub use replication::{ReplicationCoordinator, ReplicationStatsSnapshot};
