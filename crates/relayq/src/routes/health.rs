//! Health check endpoints.

use axum::{Json, extract::State};
use relayq_common::NodeRole;
use serde::Serialize;

use crate::cluster::ReplicationStatsSnapshot;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    role: NodeRole,
    members: usize,
}

/// Readiness check. A node serves from local state, so it is ready as
/// soon as it is listening; membership is reported for operators.
pub async fn ready_check(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready",
        role: state.membership.local().role,
        members: state.membership.members().await.len(),
    })
}

#[derive(Serialize)]
pub struct MetricsResponse {
    node: String,
    role: NodeRole,
    members: usize,
    queue_len: usize,
    subscribers: usize,
    uptime_secs: u64,
    replication: ReplicationStatsSnapshot,
}

/// Metrics endpoint (for monitoring)
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let local = state.membership.local();

    Json(MetricsResponse {
        node: local.name,
        role: local.role,
        members: state.membership.members().await.len(),
        queue_len: state.queue.len().await,
        subscribers: state.queue.subscriber_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
        replication: state.queue.replication().stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::{spawn_app, state};
    use serde_json::Value;

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app_state = state("relayq-1", &[("relayq-2", "127.0.0.1:9")]).await;
        app_state
            .queue
            .push(relayq_common::Item::new("a", "1"), true)
            .await
            .unwrap();
        let addr = spawn_app(app_state).await;

        let live: Value = reqwest::get(format!("http://{addr}/-/live"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(live["status"], "ok");

        let ready: Value = reqwest::get(format!("http://{addr}/ready"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ready["role"], "primary");
        assert_eq!(ready["members"], 2);

        let metrics: Value = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(metrics["node"], "relayq-1");
        assert_eq!(metrics["queue_len"], 1);
        assert_eq!(metrics["replication"]["writes_failed"], 0);
    }
}
