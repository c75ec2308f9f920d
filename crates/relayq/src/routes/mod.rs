//! HTTP route handlers for RelayQ.

use axum::{
    Json, Router,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use relayq_common::QueueError;
use relayq_common::constants::paths;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

mod health;
mod queue;
mod subscribe;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/-/live", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/-/ready", get(health::ready_check))
        .route("/metrics", get(health::metrics))

        // Queue endpoints
        .route(paths::PUSH, post(queue::push))
        .route(paths::FORCE_PUSH, post(queue::force_push))
        .route(paths::PULL, get(queue::pull))
        .route(paths::FORCE_PULL, get(queue::force_pull))
        .route(paths::QUEUE, get(queue::copy))

        // Subscriber websocket
        .route(paths::SUBSCRIBE, get(subscribe::subscribe))

        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )

        // Add shared state
        .with_state(state)
}

/// A queue error rendered as `{"error": "..."}` with its mapped status
pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::net::SocketAddr;
    use std::time::Duration;

    use crate::cluster::membership::tests::directory;
    use crate::config::{AppConfig, ReplicationSettings, SubscriptionSettings};
    use crate::state::AppState;

    /// API address every test node publishes for itself
    pub(crate) const LOCAL_METADATA: &str = "127.0.0.1:1";

    /// Timeouts short enough for tests; keepalive well out of the way
    pub(crate) fn quick_subscription() -> SubscriptionSettings {
        SubscriptionSettings {
            connect_timeout_ms: 1000,
            write_timeout_ms: 1000,
            ..Default::default()
        }
    }

    /// State for node `name` whose peers are `(name, api addr)` pairs
    pub(crate) async fn state(name: &str, peers: &[(&str, &str)]) -> AppState {
        state_with(name, peers, quick_subscription()).await
    }

    /// Like [`state`] with explicit websocket settings
    pub(crate) async fn state_with(
        name: &str,
        peers: &[(&str, &str)],
        subscription: SubscriptionSettings,
    ) -> AppState {
        let config = AppConfig {
            node_name: name.to_string(),
            replication: ReplicationSettings { peer_timeout_ms: 500 },
            subscription,
            ..Default::default()
        };
        let dir = directory(name, LOCAL_METADATA, peers).await;
        AppState::new(config, dir).unwrap()
    }

    /// Serve the full router on an ephemeral port
    pub(crate) async fn spawn_app(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = super::create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        addr
    }

    /// Poll `check` until it holds or two seconds pass
    pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..40 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}
