//! Configuration management for RelayQ.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use relayq_common::constants::{
    DEFAULT_GOSSIP_ADDR, DEFAULT_LISTEN_ADDR, GOSSIP_DEAD_AFTER_SECS, GOSSIP_INTERVAL_MS,
    GOSSIP_SUSPECT_AFTER_SECS, PEER_TIMEOUT_MS, WS_CONNECT_TIMEOUT_MS, WS_IDLE_TIMEOUT_MS,
    WS_PING_INTERVAL_MS, WS_WRITE_TIMEOUT_MS,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Node name published into the cluster; a `-1` suffix marks the primary
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// HTTP/websocket listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Externally reachable API `host:port`, published as gossip metadata
    #[serde(default)]
    pub advertise_addr: Option<String>,

    /// Gossip membership configuration
    #[serde(default)]
    pub gossip: GossipSettings,

    /// Peer fan-out configuration
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Subscriber websocket configuration
    #[serde(default)]
    pub subscription: SubscriptionSettings,
}

/// Gossip-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GossipSettings {
    /// UDP bind address for gossip traffic
    #[serde(default = "default_gossip_addr")]
    pub bind_addr: String,

    /// Seed `host:port` entries, resolved on every round
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Optional IPv4 CIDR swept at the gossip port (e.g. "10.5.0.0/28")
    #[serde(default)]
    pub subnet: Option<String>,

    /// Announce interval in milliseconds
    #[serde(default = "default_gossip_interval")]
    pub interval_ms: u64,

    /// Silence after which a member is suspect
    #[serde(default = "default_suspect_after")]
    pub suspect_after_secs: u64,

    /// Silence after which a member is dead
    #[serde(default = "default_dead_after")]
    pub dead_after_secs: u64,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_gossip_addr(),
            seeds: vec![],
            subnet: None,
            interval_ms: default_gossip_interval(),
            suspect_after_secs: default_suspect_after(),
            dead_after_secs: default_dead_after(),
        }
    }
}

/// Peer fan-out configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationSettings {
    /// Timeout of a single peer HTTP call in milliseconds
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_ms: u64,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            peer_timeout_ms: default_peer_timeout(),
        }
    }
}

impl ReplicationSettings {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

/// Subscriber websocket configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSettings {
    /// Timeout for dialing the primary when proxying
    #[serde(default = "default_ws_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single frame write on either leg
    #[serde(default = "default_ws_write_timeout")]
    pub write_timeout_ms: u64,

    /// Keepalive ping interval on every websocket leg
    #[serde(default = "default_ws_ping_interval")]
    pub ping_interval_ms: u64,

    /// A leg that delivers no frame (pongs included) for this long is closed
    #[serde(default = "default_ws_idle_timeout")]
    pub idle_timeout_ms: u64,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_ws_connect_timeout(),
            write_timeout_ms: default_ws_write_timeout(),
            ping_interval_ms: default_ws_ping_interval(),
            idle_timeout_ms: default_ws_idle_timeout(),
        }
    }
}

impl SubscriptionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

// Default value functions
fn default_node_name() -> String { "relayq-1".to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_gossip_addr() -> String { DEFAULT_GOSSIP_ADDR.to_string() }
fn default_gossip_interval() -> u64 { GOSSIP_INTERVAL_MS }
fn default_suspect_after() -> u64 { GOSSIP_SUSPECT_AFTER_SECS }
fn default_dead_after() -> u64 { GOSSIP_DEAD_AFTER_SECS }
fn default_peer_timeout() -> u64 { PEER_TIMEOUT_MS }
fn default_ws_connect_timeout() -> u64 { WS_CONNECT_TIMEOUT_MS }
fn default_ws_write_timeout() -> u64 { WS_WRITE_TIMEOUT_MS }
fn default_ws_ping_interval() -> u64 { WS_PING_INTERVAL_MS }
fn default_ws_idle_timeout() -> u64 { WS_IDLE_TIMEOUT_MS }

impl AppConfig {
    /// Load configuration from file and `RELAYQ__*` env, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut builder = config::Config::builder();
        if Path::new(config_path).exists() {
            builder = builder.add_source(config::File::with_name(config_path));
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("RELAYQ")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("gossip.seeds")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load config")?;

        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to parse config")?;

        // Apply CLI overrides
        if let Some(ref name) = args.node_name {
            config.node_name = name.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref advertise) = args.advertise {
            config.advertise_addr = Some(advertise.clone());
        }
        if let Some(ref gossip_bind) = args.gossip_bind {
            config.gossip.bind_addr = gossip_bind.clone();
        }
        if !args.seeds.is_empty() {
            config.gossip.seeds = args.seeds.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            bail!("node_name is required");
        }

        let api: SocketAddr = self
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen_addr {}", self.listen_addr))?;
        let gossip: SocketAddr = self
            .gossip
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid gossip.bind_addr {}", self.gossip.bind_addr))?;
        if api.port() == gossip.port() && api.port() != 0 {
            bail!("API and gossip ports must differ (both {})", api.port());
        }

        if self.gossip.suspect_after_secs >= self.gossip.dead_after_secs {
            bail!("gossip.suspect_after_secs must be below gossip.dead_after_secs");
        }

        if let Some(ref subnet) = self.gossip.subnet {
            parse_subnet(subnet)?;
        }

        if self.subscription.ping_interval_ms == 0
            || self.subscription.ping_interval_ms >= self.subscription.idle_timeout_ms
        {
            bail!("subscription.ping_interval_ms must be non-zero and below subscription.idle_timeout_ms");
        }

        // Peers dial this address; a wildcard would loop back to the caller
        let advertised = self.advertised_api();
        match advertised.parse::<SocketAddr>() {
            Ok(addr) if addr.ip().is_unspecified() || addr.port() == 0 => {
                bail!(
                    "Advertised API address {advertised} is not reachable by peers; \
                     set advertise_addr when listen_addr is a wildcard"
                );
            }
            Ok(_) => {}
            Err(_) => {
                let port = advertised
                    .rsplit_once(':')
                    .and_then(|(host, port)| (!host.is_empty()).then_some(port))
                    .and_then(|port| port.parse::<u16>().ok());
                if !matches!(port, Some(p) if p != 0) {
                    bail!("advertise_addr {advertised} must be host:port");
                }
            }
        }

        Ok(())
    }

    /// The `host:port` other nodes use to reach this node's API
    pub fn advertised_api(&self) -> String {
        match self.advertise_addr {
            Some(ref addr) => addr.clone(),
            None => self.listen_addr.clone(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            gossip: GossipSettings::default(),
            replication: ReplicationSettings::default(),
            subscription: SubscriptionSettings::default(),
        }
    }
}

/// Parse an IPv4 CIDR into its (network, prefix). Prefixes wider than /16
/// are rejected so the sweep stays bounded.
pub fn parse_subnet(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr
        .split_once('/')
        .with_context(|| format!("Subnet {cidr} is not in CIDR notation"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .with_context(|| format!("Invalid subnet address {addr}"))?;
    let prefix: u8 = prefix
        .parse()
        .with_context(|| format!("Invalid subnet prefix {prefix}"))?;

    if !(16..=32).contains(&prefix) {
        bail!("Subnet prefix /{prefix} out of range (16-32)");
    }

    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    Ok((Ipv4Addr::from(u32::from(addr) & mask), prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Defaults plus a reachable advertised address
    fn reachable() -> AppConfig {
        AppConfig {
            advertise_addr: Some("10.5.0.2:8080".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_reachable_config_is_valid() {
        let config = reachable();
        assert!(config.validate().is_ok());
        assert_eq!(config.advertised_api(), "10.5.0.2:8080");

        let config = AppConfig {
            advertise_addr: Some("relayq-2.internal:8080".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wildcard_listen_requires_advertise() {
        let config = AppConfig::default();
        assert_eq!(config.advertised_api(), DEFAULT_LISTEN_ADDR);
        assert!(config.validate().is_err());

        let config = AppConfig {
            advertise_addr: Some("0.0.0.0:8080".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            advertise_addr: Some("[::]:8080".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // A concrete listen address is itself reachable
        let config = AppConfig {
            listen_addr: "127.0.0.1:8080".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_malformed_advertise() {
        for bad in ["relayq-2", "relayq-2:", ":8080", "relayq-2:0", "10.5.0.2:0"] {
            let config = AppConfig {
                advertise_addr: Some(bad.to_string()),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn test_rejects_keepalive_not_below_idle() {
        let config = AppConfig {
            subscription: SubscriptionSettings {
                ping_interval_ms: 30_000,
                idle_timeout_ms: 30_000,
                ..Default::default()
            },
            ..reachable()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shared_port() {
        let config = AppConfig {
            listen_addr: "0.0.0.0:9000".to_string(),
            gossip: GossipSettings {
                bind_addr: "0.0.0.0:9000".to_string(),
                ..Default::default()
            },
            ..reachable()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_name_and_inverted_liveness() {
        let config = AppConfig {
            node_name: " ".to_string(),
            ..reachable()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            gossip: GossipSettings {
                suspect_after_secs: 20,
                dead_after_secs: 10,
                ..Default::default()
            },
            ..reachable()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_subnet() {
        let (net, prefix) = parse_subnet("10.5.0.7/28").unwrap();
        assert_eq!(net, Ipv4Addr::new(10, 5, 0, 0));
        assert_eq!(prefix, 28);

        let (net, prefix) = parse_subnet("192.168.1.9/32").unwrap();
        assert_eq!(net, Ipv4Addr::new(192, 168, 1, 9));
        assert_eq!(prefix, 32);

        assert!(parse_subnet("10.0.0.0/8").is_err());
        assert!(parse_subnet("10.0.0.0").is_err());
        assert!(parse_subnet("nope/24").is_err());
    }
}
