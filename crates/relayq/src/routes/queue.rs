//! Queue endpoints: thin adapters from HTTP onto `QueueService`.

use axum::{
    Json,
    extract::{Query, State},
};
use relayq_common::{Item, QueueSnapshot};
use serde::Deserialize;

use super::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PushQuery {
    key: String,
    /// A missing value is stored as empty
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
pub struct PullQuery {
    key: Option<String>,
}

/// Public push; replicated to peers
pub async fn push(
    State(state): State<AppState>,
    Query(params): Query<PushQuery>,
) -> Result<Json<Item>, ApiError> {
    let item = state
        .queue
        .push(Item::new(params.key, params.value), false)
        .await?;
    Ok(Json(item))
}

/// Peer-originated push; never replicated further
pub async fn force_push(
    State(state): State<AppState>,
    Query(params): Query<PushQuery>,
) -> Result<Json<Item>, ApiError> {
    let item = state
        .queue
        .push(Item::new(params.key, params.value), true)
        .await?;
    Ok(Json(item))
}

/// Public pull of the head; `key` is ignored
pub async fn pull(
    State(state): State<AppState>,
    Query(params): Query<PullQuery>,
) -> Result<Json<Option<Item>>, ApiError> {
    let item = state.queue.pull(params.key.as_deref(), false).await?;
    Ok(Json(item))
}

/// Peer-originated pull; with `key` it forgets that key and returns `null`
pub async fn force_pull(
    State(state): State<AppState>,
    Query(params): Query<PullQuery>,
) -> Result<Json<Option<Item>>, ApiError> {
    let item = state.queue.pull(params.key.as_deref(), true).await?;
    Ok(Json(item))
}

/// Whole local queue
pub async fn copy(State(state): State<AppState>) -> Json<QueueSnapshot> {
    Json(state.queue.copy().await)
}
