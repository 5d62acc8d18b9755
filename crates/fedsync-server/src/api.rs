//! REST handlers behind the signed gateway.

use crate::AppState;
use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use fedsync_gateway::Admission;
use fedsync_types::ReasonCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the REST handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("sync store unavailable")]
    StoreUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            ApiError::StoreUnavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, ReasonCode::InternalError)
            }
        };
        (
            status,
            Json(json!({ "code": code, "message": self.to_string() })),
        )
            .into_response()
    }
}

/// Body of `POST /api/sync`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSubmission {
    pub message_id: String,
    pub sync_type: String,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

/// `POST /api/sync` — records a sync submission from an admitted platform.
///
/// Idempotent under retry: resubmitting the same `messageId` replays the
/// original acknowledgment.
pub async fn submit_sync_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(admission): Extension<Admission>,
    Json(submission): Json<SyncSubmission>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ack = state
        .hub
        .store()
        .record_sync(
            &admission.platform_id,
            &submission.message_id,
            &submission.sync_type,
            &submission.items,
        )
        .await
        .map_err(|e| {
            tracing::error!(
                platform_id = %admission.platform_id,
                message_id = %submission.message_id,
                "sync submission failed: {}",
                e
            );
            ApiError::StoreUnavailable
        })?;

    Ok(Json(json!({ "ack": ack })))
}

/// `GET /api/nodes` — point-in-time view of every live session.
pub async fn list_nodes_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let sessions = state.hub.registry.snapshot().await;
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

/// Body of `POST /api/nodes/{nodeId}/status`.
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// `POST /api/nodes/{nodeId}/status` — pushes a node status downstream.
pub async fn update_node_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .hub
        .store()
        .update_node_status(&node_id, &update.status)
        .await
        .map_err(|e| {
            tracing::error!(node_id = %node_id, "status update failed: {}", e);
            ApiError::StoreUnavailable
        })?;

    Ok(Json(json!({
        "nodeId": node_id,
        "status": update.status,
    })))
}
