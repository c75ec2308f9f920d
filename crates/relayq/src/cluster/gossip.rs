//! Membership Gossip Protocol (UDP)
//!
//! Each node announces itself every interval to its seeds, to every
//! member it already knows, and (while it knows nobody) to every address
//! of an optional subnet sweep. An announcement carries the sender's
//! descriptor plus a digest of the members it considers live, so a node
//! that reaches any one member eventually learns all of them.
//!
//! Liveness is derived from silence:
//! - Alive: heard from directly within `suspect_after`
//! - Suspect: silent for longer than `suspect_after`
//! - Dead: silent for longer than `dead_after`, or announced `Leave`
//!
//! Rumors (digest entries) only ever introduce unknown members; they never
//! refresh a member's `last_seen`, so a dead node cannot be kept alive by
//! gossip about it.

use anyhow::{Context, Result};
use relayq_common::{NodeRole, NodeState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Gossip protocol configuration
#[derive(Clone, Debug)]
pub struct GossipConfig {
    /// Local bind address (e.g., "0.0.0.0:8081")
    pub bind_addr: String,
    /// Seed `host:port` entries to announce to
    pub seeds: Vec<String>,
    /// Subnet swept at the gossip port while no member is known
    pub subnet: Option<(Ipv4Addr, u8)>,
    /// Announce interval
    pub interval: Duration,
    /// Silence before a member is suspect
    pub suspect_after: Duration,
    /// Silence before a member is dead
    pub dead_after: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            seeds: vec![],
            subnet: None,
            interval: Duration::from_secs(1),
            suspect_after: Duration::from_secs(5),
            dead_after: Duration::from_secs(15),
        }
    }
}

/// What a node publishes about itself when it joins
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique node name (encodes the role)
    pub name: String,
    /// Externally reachable API `host:port`
    pub metadata: String,
}

/// A digest entry: a member the sender considers live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownMember {
    pub node: NodeDescriptor,
    /// Gossip address the sender reaches this member at
    pub address: SocketAddr,
}

/// Gossip packet exchanged between nodes
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    /// Periodic heartbeat carrying a membership digest
    Announce {
        node: NodeDescriptor,
        known: Vec<KnownMember>,
        /// Unix timestamp
        timestamp: i64,
        /// Software version
        version: String,
    },
    /// Graceful departure
    Leave { name: String },
}

impl GossipMessage {
    /// Build an announcement for `node` with the current digest
    pub fn announce(node: NodeDescriptor, known: Vec<KnownMember>) -> Self {
        Self::Announce {
            node,
            known,
            timestamp: chrono::Utc::now().timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Gossip-side record of a remote member
#[derive(Clone, Debug)]
pub struct MemberRecord {
    pub node: NodeDescriptor,
    /// Gossip transport address
    pub address: SocketAddr,
    /// Resolved once, when the member is first recorded
    pub role: NodeRole,
    /// Last direct contact
    pub last_seen: Instant,
    /// Set when the member announced `Leave`
    pub left: bool,
}

/// Gossip service for cluster membership
pub struct GossipService {
    /// Configuration
    config: GossipConfig,
    /// Our descriptor
    local: NodeDescriptor,
    /// Our role
    local_role: NodeRole,
    /// Known remote members keyed by name
    members: Arc<RwLock<HashMap<String, MemberRecord>>>,
    /// Last state reported per member (for transition logging)
    reported: Arc<RwLock<HashMap<String, NodeState>>>,
}

impl GossipService {
    /// Create a new gossip service
    pub fn new(config: GossipConfig, local: NodeDescriptor) -> Self {
        let local_role = NodeRole::from_name(&local.name);
        Self {
            config,
            local,
            local_role,
            members: Arc::new(RwLock::new(HashMap::new())),
            reported: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Our descriptor
    pub fn local(&self) -> &NodeDescriptor {
        &self.local
    }

    /// Our role
    pub fn local_role(&self) -> NodeRole {
        self.local_role
    }

    /// Bind the gossip socket shared by the broadcaster and the receiver.
    ///
    /// Sending from the bound port lets peers learn our gossip address
    /// from the packet source.
    pub async fn bind(&self) -> Result<Arc<UdpSocket>> {
        let socket = UdpSocket::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind gossip socket {}", self.config.bind_addr))?;
        Ok(Arc::new(socket))
    }

    /// Liveness of a record at `now`
    pub fn state_of(&self, record: &MemberRecord, now: Instant) -> NodeState {
        if record.left {
            return NodeState::Dead;
        }
        let silence = now.saturating_duration_since(record.last_seen);
        if silence > self.config.dead_after {
            NodeState::Dead
        } else if silence > self.config.suspect_after {
            NodeState::Suspect
        } else {
            NodeState::Alive
        }
    }

    /// All remote records with their current state
    pub async fn records(&self) -> Vec<(MemberRecord, NodeState)> {
        let now = Instant::now();
        let members = self.members.read().await;
        members
            .values()
            .map(|r| (r.clone(), self.state_of(r, now)))
            .collect()
    }

    /// Digest of the members we consider live
    async fn digest(&self) -> Vec<KnownMember> {
        self.records()
            .await
            .into_iter()
            .filter(|(_, state)| state.is_live())
            .map(|(r, _)| KnownMember {
                node: r.node,
                address: r.address,
            })
            .collect()
    }

    /// Run the gossip broadcaster
    pub async fn run_broadcaster(
        &self,
        socket: Arc<UdpSocket>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let interval = self.config.interval;

        tracing::info!(
            seeds = ?self.config.seeds,
            subnet = ?self.config.subnet,
            interval = ?interval,
            "Gossip broadcaster started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.broadcast_once(&socket).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Gossip broadcaster shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Send one announcement round
    pub async fn broadcast_once(&self, socket: &UdpSocket) {
        let packet = GossipMessage::announce(self.local.clone(), self.digest().await);
        let bytes = match serde_json::to_vec(&packet) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize gossip packet");
                return;
            }
        };

        for target in self.targets().await {
            if let Err(e) = socket.send_to(&bytes, target).await {
                tracing::debug!(peer = %target, error = %e, "Failed to send gossip");
            }
        }
    }

    /// Announce our departure to every known member
    pub async fn leave(&self, socket: &UdpSocket) {
        let packet = GossipMessage::Leave {
            name: self.local.name.clone(),
        };
        let Ok(bytes) = serde_json::to_vec(&packet) else {
            return;
        };

        for target in self.targets().await {
            if let Err(e) = socket.send_to(&bytes, target).await {
                tracing::debug!(peer = %target, error = %e, "Failed to send leave");
            }
        }
        tracing::info!(node = %self.local.name, "Left gossip cluster");
    }

    /// Addresses to announce to this round
    async fn targets(&self) -> HashSet<SocketAddr> {
        let mut targets = HashSet::new();

        let records = self.records().await;
        let lonely = !records.iter().any(|(_, state)| state.is_live());
        for (record, state) in records {
            if state.is_live() {
                targets.insert(record.address);
            }
        }

        for seed in &self.config.seeds {
            match tokio::time::timeout(self.config.interval, tokio::net::lookup_host(seed.as_str()))
                .await
            {
                Ok(Ok(addrs)) => targets.extend(addrs),
                Ok(Err(e)) => tracing::debug!(seed = %seed, error = %e, "Seed lookup failed"),
                Err(_) => tracing::debug!(seed = %seed, "Seed lookup timed out"),
            }
        }

        if lonely {
            if let Some((network, prefix)) = self.config.subnet {
                let port = self.gossip_port();
                targets.extend(sweep(network, prefix).map(|ip| SocketAddr::from((ip, port))));
            }
        }

        targets
    }

    fn gossip_port(&self) -> u16 {
        self.config
            .bind_addr
            .parse::<SocketAddr>()
            .map(|a| a.port())
            .unwrap_or(0)
    }

    /// Run the gossip receiver
    pub async fn run_receiver(
        &self,
        socket: Arc<UdpSocket>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut health = tokio::time::interval(Duration::from_secs(1));

        tracing::info!(
            addr = %self.config.bind_addr,
            "Gossip receiver started"
        );

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            self.handle_packet(&buf[..len], addr).await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Gossip receive error");
                        }
                    }
                }
                _ = health.tick() => {
                    self.check_member_health().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Gossip receiver shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle an incoming gossip packet
    async fn handle_packet(&self, data: &[u8], addr: SocketAddr) {
        match serde_json::from_slice::<GossipMessage>(data) {
            Ok(message) => self.observe(message, addr).await,
            Err(e) => tracing::warn!(addr = %addr, error = %e, "Invalid gossip packet"),
        }
    }

    /// Apply a decoded gossip message received from `addr`
    pub async fn observe(&self, message: GossipMessage, addr: SocketAddr) {
        match message {
            GossipMessage::Announce { node, known, .. } => {
                // Don't process our own packets
                if node.name == self.local.name {
                    return;
                }

                tracing::trace!(node = %node.name, addr = %addr, "Received gossip");

                let now = Instant::now();
                let mut members = self.members.write().await;

                let joined = !members.contains_key(&node.name);
                let role = NodeRole::from_name(&node.name);
                let record = members.entry(node.name.clone()).or_insert_with(|| MemberRecord {
                    node: node.clone(),
                    address: addr,
                    role,
                    last_seen: now,
                    left: false,
                });
                record.address = addr;
                record.last_seen = now;
                record.left = false;
                // Metadata is set once at startup; a restarted node may publish a new one.
                record.node.metadata = node.metadata;

                if joined {
                    tracing::info!(node = %node.name, addr = %addr, role = %role, "Member joined");
                }

                for rumor in known {
                    if rumor.node.name == self.local.name || members.contains_key(&rumor.node.name) {
                        continue;
                    }
                    tracing::debug!(node = %rumor.node.name, via = %node.name, "Member learned from digest");
                    let role = NodeRole::from_name(&rumor.node.name);
                    members.insert(
                        rumor.node.name.clone(),
                        MemberRecord {
                            node: rumor.node,
                            address: rumor.address,
                            role,
                            last_seen: now,
                            left: false,
                        },
                    );
                }
            }
            GossipMessage::Leave { name } => {
                let mut members = self.members.write().await;
                if let Some(record) = members.get_mut(&name) {
                    record.left = true;
                    tracing::info!(node = %name, "Member left");
                }
            }
        }
    }

    /// Log state transitions and reap long-dead members
    pub async fn check_member_health(&self) {
        let now = Instant::now();
        let reap_after = self.config.dead_after * 2;

        let mut members = self.members.write().await;
        let mut reported = self.reported.write().await;

        members.retain(|name, record| {
            let silence = now.saturating_duration_since(record.last_seen);
            let keep = !(record.left || silence > self.config.dead_after) || silence <= reap_after;
            if !keep {
                tracing::info!(node = %name, "Member reaped");
                reported.remove(name);
            }
            keep
        });

        for (name, record) in members.iter() {
            let state = self.state_of(record, now);
            let previous = reported.insert(name.clone(), state);
            if previous.is_some_and(|p| p != state) {
                match state {
                    NodeState::Alive => tracing::info!(node = %name, "Member alive again"),
                    NodeState::Suspect => tracing::warn!(node = %name, "Member suspect (silent)"),
                    NodeState::Dead => tracing::warn!(node = %name, "Member dead"),
                }
            }
        }
    }
}

/// Host addresses of an IPv4 network (network/broadcast excluded below /31)
pub fn sweep(network: Ipv4Addr, prefix: u8) -> impl Iterator<Item = Ipv4Addr> {
    let base = u32::from(network);
    let size = 1u64 << (32 - u32::from(prefix));
    let (first, last) = if size <= 2 {
        (0, size)
    } else {
        (1, size - 1)
    };
    (first..last).map(move |offset| Ipv4Addr::from(base + offset as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> GossipService {
        GossipService::new(
            GossipConfig::default(),
            NodeDescriptor {
                name: name.to_string(),
                metadata: "127.0.0.1:8080".to_string(),
            },
        )
    }

    fn announce(name: &str, metadata: &str) -> GossipMessage {
        GossipMessage::announce(
            NodeDescriptor {
                name: name.to_string(),
                metadata: metadata.to_string(),
            },
            vec![],
        )
    }

    #[test]
    fn test_gossip_packet_serialization() {
        let packet = GossipMessage::announce(
            NodeDescriptor {
                name: "relayq-1".to_string(),
                metadata: "10.0.0.1:8080".to_string(),
            },
            vec![KnownMember {
                node: NodeDescriptor {
                    name: "relayq-2".to_string(),
                    metadata: "10.0.0.2:8080".to_string(),
                },
                address: "10.0.0.2:8081".parse().unwrap(),
            }],
        );

        let json = serde_json::to_string(&packet).unwrap();
        assert!(json.contains(r#""type":"announce""#));

        let parsed: GossipMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            GossipMessage::Announce { node, known, .. } => {
                assert_eq!(node.name, "relayq-1");
                assert_eq!(known.len(), 1);
                assert_eq!(known[0].node.metadata, "10.0.0.2:8080");
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_own_packets_ignored() {
        let gossip = service("relayq-2");
        gossip
            .observe(announce("relayq-2", "x:1"), "10.0.0.2:8081".parse().unwrap())
            .await;
        assert!(gossip.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_role_resolved_on_record() {
        let gossip = service("relayq-2");
        gossip
            .observe(announce("relayq-1", "10.0.0.1:8080"), "10.0.0.1:8081".parse().unwrap())
            .await;

        let records = gossip.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.role, NodeRole::Primary);
        assert_eq!(records[0].1, NodeState::Alive);
        assert_eq!(gossip.local_role(), NodeRole::Replica);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_transitions_and_reap() {
        let gossip = service("relayq-2");
        gossip
            .observe(announce("relayq-3", "10.0.0.3:8080"), "10.0.0.3:8081".parse().unwrap())
            .await;

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(gossip.records().await[0].1, NodeState::Suspect);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(gossip.records().await[0].1, NodeState::Dead);

        tokio::time::advance(Duration::from_secs(15)).await;
        gossip.check_member_health().await;
        assert!(gossip.records().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rumor_never_refreshes_known_member() {
        let gossip = service("relayq-2");
        gossip
            .observe(announce("relayq-3", "10.0.0.3:8080"), "10.0.0.3:8081".parse().unwrap())
            .await;

        tokio::time::advance(Duration::from_secs(6)).await;

        let rumor = GossipMessage::announce(
            NodeDescriptor {
                name: "relayq-1".to_string(),
                metadata: "10.0.0.1:8080".to_string(),
            },
            vec![KnownMember {
                node: NodeDescriptor {
                    name: "relayq-3".to_string(),
                    metadata: "10.0.0.3:8080".to_string(),
                },
                address: "10.0.0.3:8081".parse().unwrap(),
            }],
        );
        gossip.observe(rumor, "10.0.0.1:8081".parse().unwrap()).await;

        let records = gossip.records().await;
        let stale = records.iter().find(|(r, _)| r.node.name == "relayq-3").unwrap();
        assert_eq!(stale.1, NodeState::Suspect);
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_leave_marks_dead() {
        let gossip = service("relayq-2");
        gossip
            .observe(announce("relayq-3", "10.0.0.3:8080"), "10.0.0.3:8081".parse().unwrap())
            .await;
        gossip
            .observe(
                GossipMessage::Leave {
                    name: "relayq-3".to_string(),
                },
                "10.0.0.3:8081".parse().unwrap(),
            )
            .await;

        assert_eq!(gossip.records().await[0].1, NodeState::Dead);
    }

    #[test]
    fn test_sweep_excludes_network_and_broadcast() {
        let hosts: Vec<_> = sweep(Ipv4Addr::new(10, 5, 0, 0), 30).collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 5, 0, 1), Ipv4Addr::new(10, 5, 0, 2)]);

        let single: Vec<_> = sweep(Ipv4Addr::new(10, 5, 0, 9), 32).collect();
        assert_eq!(single, vec![Ipv4Addr::new(10, 5, 0, 9)]);
    }

    #[tokio::test]
    async fn test_two_services_discover_each_other() {
        let a = GossipService::new(
            GossipConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                ..Default::default()
            },
            NodeDescriptor {
                name: "relayq-1".to_string(),
                metadata: "127.0.0.1:9001".to_string(),
            },
        );
        let sock_a = a.bind().await.unwrap();
        let addr_a = sock_a.local_addr().unwrap();

        let b = GossipService::new(
            GossipConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                seeds: vec![addr_a.to_string()],
                ..Default::default()
            },
            NodeDescriptor {
                name: "relayq-2".to_string(),
                metadata: "127.0.0.1:9002".to_string(),
            },
        );
        let sock_b = b.bind().await.unwrap();

        b.broadcast_once(&sock_b).await;

        let mut buf = vec![0u8; 64 * 1024];
        let (len, from) = sock_a.recv_from(&mut buf).await.unwrap();
        a.handle_packet(&buf[..len], from).await;

        let records = a.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.node.metadata, "127.0.0.1:9002");
        assert_eq!(records[0].0.address, sock_b.local_addr().unwrap());
    }
}
