//! Canvas status and control handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use canvas_watch_core::error::CanvasWatchError;
use canvas_watch_core::types::CanvasStatus;

use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    /// Empty or missing clears the override.
    #[serde(default, alias = "clientName")]
    pub client_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideResponse {
    pub success: bool,
    pub client_name: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestartResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Unknown or unnamed targets are the caller's problem (400); anything else
/// means the remote product could not be reached or answered badly (502).
fn failure_status(e: &CanvasWatchError) -> StatusCode {
    if e.is_resolution() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    }
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn status_handler(State(state): State<Arc<GatewayState>>) -> Json<CanvasStatus> {
    Json(state.service.status())
}

pub async fn override_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<OverrideRequest>,
) -> (StatusCode, Json<OverrideResponse>) {
    match state.service.override_client(&req.client_name).await {
        Ok(outcome) => {
            info!(
                client_name = %outcome.client_name,
                client_id = %outcome.client_id,
                "Client override applied"
            );
            (
                StatusCode::OK,
                Json(OverrideResponse {
                    success: true,
                    client_name: outcome.client_name,
                    client_id: outcome.client_id,
                    error: None,
                }),
            )
        }
        Err(e) => {
            warn!(client_name = %req.client_name, %e, "Client override rejected");
            (
                failure_status(&e),
                Json(OverrideResponse {
                    success: false,
                    client_name: req.client_name,
                    client_id: String::new(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn restart_handler(
    State(state): State<Arc<GatewayState>>,
) -> (StatusCode, Json<RestartResponse>) {
    match state.service.restart().await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(RestartResponse {
                success: true,
                client_id: Some(outcome.client_id),
                error: None,
            }),
        ),
        Err(e) => {
            warn!(%e, "Tracking restart failed");
            (
                failure_status(&e),
                Json(RestartResponse {
                    success: false,
                    client_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
