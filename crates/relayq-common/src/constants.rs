//! Shared constants for RelayQ components.

/// Default API (HTTP + websocket) listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default gossip (UDP) bind address
pub const DEFAULT_GOSSIP_ADDR: &str = "0.0.0.0:8081";

/// Node name suffix that marks the primary node
pub const PRIMARY_SUFFIX: &str = "-1";

/// Gossip announce interval (milliseconds)
pub const GOSSIP_INTERVAL_MS: u64 = 1000;

/// A member not heard from for this long becomes suspect
pub const GOSSIP_SUSPECT_AFTER_SECS: u64 = 5;

/// A member not heard from for this long becomes dead
pub const GOSSIP_DEAD_AFTER_SECS: u64 = 15;

/// Timeout for a single peer HTTP call (milliseconds)
pub const PEER_TIMEOUT_MS: u64 = 6000;

/// Timeout for opening the proxied websocket leg (milliseconds)
pub const WS_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Timeout for a single websocket frame write (milliseconds)
pub const WS_WRITE_TIMEOUT_MS: u64 = 5000;

/// Interval between websocket keepalive pings (milliseconds)
pub const WS_PING_INTERVAL_MS: u64 = 10_000;

/// A websocket leg silent for this long (no frame, no pong) is closed (milliseconds)
pub const WS_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Route paths served by every node
pub mod paths {
    /// Public push
    pub const PUSH: &str = "/push";

    /// Peer-originated push (no further replication)
    pub const FORCE_PUSH: &str = "/_push";

    /// Public pull of the queue head
    pub const PULL: &str = "/pull";

    /// Peer-originated pull; with `key` it forgets that key
    pub const FORCE_PULL: &str = "/_pull";

    /// Full queue snapshot
    pub const QUEUE: &str = "/queue";

    /// Websocket subscription endpoint
    pub const SUBSCRIBE: &str = "/subscribe";
}

/// Websocket sub-protocol strings
pub mod protocol {
    /// The only frame a client may send
    pub const SUBSCRIBE_FRAME: &str = "subscribe\n";

    /// Acknowledgement for a successful subscribe
    pub const SUBSCRIBE_ACK: &str = "You subscribe successfully";

    /// Reply to any frame other than [`SUBSCRIBE_FRAME`]
    pub const INVALID_MESSAGE: &str = "Invalid Message";
}
