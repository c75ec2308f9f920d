//! Best-effort replication over peer HTTP calls.
//!
//! Writes and reads are fanned out to every live peer concurrently, one
//! task per peer, and joined before returning. Peer failures are counted
//! and logged but never change the outcome of the local operation: local
//! state is authoritative and peers converge opportunistically.
//!
//! A joining node bootstraps by asking peers, one at a time, for a full
//! snapshot and stopping at the first one that answers.

use anyhow::{Context, Result};
use futures::future::join_all;
use relayq_common::constants::paths;
use relayq_common::{Item, QueueError, QueueSnapshot};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::membership::{MembershipDirectory, Node};

/// Outcome of a single fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl FanOutReport {
    fn absorb(&mut self, results: &[bool]) {
        for ok in results {
            if *ok {
                self.succeeded += 1;
            } else {
                self.failed += 1;
            }
        }
    }
}

/// Cumulative fan-out telemetry
#[derive(Default)]
pub struct ReplicationStats {
    pub writes_ok: AtomicU64,
    pub writes_failed: AtomicU64,
    pub reads_ok: AtomicU64,
    pub reads_failed: AtomicU64,
}

/// Point-in-time copy of [`ReplicationStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStatsSnapshot {
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
}

/// Fans queue mutations out to peers and bootstraps from them
pub struct ReplicationCoordinator {
    membership: MembershipDirectory,
    client: reqwest::Client,
    stats: ReplicationStats,
}

impl ReplicationCoordinator {
    /// Create a coordinator whose peer calls are bounded by `peer_timeout`
    pub fn new(membership: MembershipDirectory, peer_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(peer_timeout)
            .connect_timeout(peer_timeout)
            .build()
            .context("Failed to build peer HTTP client")?;

        Ok(Self {
            membership,
            client,
            stats: ReplicationStats::default(),
        })
    }

    /// Fetch a full snapshot from the first peer that answers.
    ///
    /// Peers are tried sequentially. Unreachable peers and non-success
    /// answers move on to the next peer; an undecodable body from an
    /// answering peer aborts with `ParseData`.
    pub async fn bootstrap(&self) -> Result<QueueSnapshot, QueueError> {
        for peer in self.membership.peers().await {
            let url = peer_url(&peer.metadata, paths::QUEUE, &[]);

            let response = match self.client.get(&url).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    tracing::debug!(peer = %peer.name, status = %r.status(), "Bootstrap peer refused");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(peer = %peer.name, error = %e, "Bootstrap peer unreachable");
                    continue;
                }
            };

            let body = match response.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    tracing::debug!(peer = %peer.name, error = %e, "Bootstrap body read failed");
                    continue;
                }
            };

            tracing::info!(peer = %peer.name, bytes = body.len(), "Fetched bootstrap snapshot");
            return QueueSnapshot::from_slice(&body);
        }

        Err(QueueError::QueueNotFound)
    }

    /// Copy a locally accepted push to every peer.
    ///
    /// Non-primary peers are written concurrently first, then the primary.
    pub async fn replicate_write(&self, item: &Item) -> FanOutReport {
        let (primaries, others): (Vec<Node>, Vec<Node>) = self
            .membership
            .peers()
            .await
            .into_iter()
            .partition(Node::is_primary);

        let query = [("key", item.key.as_str()), ("value", item.value.as_str())];
        let mut report = FanOutReport::default();

        for group in [others, primaries] {
            if group.is_empty() {
                continue;
            }
            let calls = group.iter().map(|peer| {
                let url = peer_url(&peer.metadata, paths::FORCE_PUSH, &query);
                self.call(peer, self.client.post(url))
            });
            report.absorb(&join_all(calls).await);
        }

        self.stats.writes_ok.fetch_add(report.succeeded as u64, Ordering::Relaxed);
        self.stats.writes_failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        tracing::debug!(
            key = %item.key,
            succeeded = report.succeeded,
            failed = report.failed,
            "Write replicated"
        );
        report
    }

    /// Tell every peer to forget `key`
    pub async fn replicate_read(&self, key: &str) -> FanOutReport {
        let peers = self.membership.peers().await;
        let query = [("key", key)];

        let calls = peers.iter().map(|peer| {
            let url = peer_url(&peer.metadata, paths::FORCE_PULL, &query);
            self.call(peer, self.client.get(url))
        });

        let mut report = FanOutReport::default();
        report.absorb(&join_all(calls).await);

        self.stats.reads_ok.fetch_add(report.succeeded as u64, Ordering::Relaxed);
        self.stats.reads_failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        tracing::debug!(
            key = %key,
            succeeded = report.succeeded,
            failed = report.failed,
            "Read replicated"
        );
        report
    }

    pub fn stats(&self) -> ReplicationStatsSnapshot {
        ReplicationStatsSnapshot {
            writes_ok: self.stats.writes_ok.load(Ordering::Relaxed),
            writes_failed: self.stats.writes_failed.load(Ordering::Relaxed),
            reads_ok: self.stats.reads_ok.load(Ordering::Relaxed),
            reads_failed: self.stats.reads_failed.load(Ordering::Relaxed),
        }
    }

    /// One peer call. Errors are logged here and reduced to `false`.
    async fn call(&self, peer: &Node, request: reqwest::RequestBuilder) -> bool {
        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(peer = %peer.name, status = %response.status(), "Peer rejected replica");
                false
            }
            Err(e) => {
                tracing::warn!(peer = %peer.name, error = %e, "Peer unreachable");
                false
            }
        }
    }
}

/// `http://{metadata}{path}?k=v&...` with percent-encoded values
fn peer_url(metadata: &str, path: &str, query: &[(&str, &str)]) -> String {
    let mut url = format!("http://{metadata}{path}");
    for (i, (k, v)) in query.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(k);
        url.push('=');
        url.push_str(&urlencoding::encode(v));
    }
    url
}
