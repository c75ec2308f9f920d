//! Application state and shared resources.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

use crate::cluster::{MembershipDirectory, ReplicationCoordinator};
use crate::config::AppConfig;
use crate::queue::QueueService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Live view of the cluster
    pub membership: MembershipDirectory,

    /// Queue operations (store + subscribers + replication)
    pub queue: Arc<QueueService>,

    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Wire the queue service to the membership view
    pub fn new(config: AppConfig, membership: MembershipDirectory) -> Result<Self> {
        let replication = Arc::new(ReplicationCoordinator::new(
            membership.clone(),
            config.replication.peer_timeout(),
        )?);
        let queue = Arc::new(QueueService::new(replication));

        Ok(Self {
            config,
            membership,
            queue,
            started_at: Instant::now(),
        })
    }

    /// Whether this node terminates subscriber connections
    pub fn is_primary(&self) -> bool {
        self.membership.is_primary()
    }
}
