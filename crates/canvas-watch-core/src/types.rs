use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A client installation as reported by the remote product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    #[serde(default, alias = "installationName")]
    pub installation_name: String,
    #[serde(default)]
    pub name: String,
}

impl ClientInfo {
    /// Human-readable label: the client name, or the installation name when
    /// the remote side left it blank.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.installation_name
        } else {
            &self.name
        }
    }
}

/// A canvas change pushed by the workspace subscription.
///
/// `canvas_name` may arrive empty and is backfilled by a follow-up fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasEvent {
    #[serde(alias = "canvasId")]
    pub canvas_id: String,
    #[serde(default, alias = "canvasName")]
    pub canvas_name: String,
}

impl CanvasEvent {
    pub fn new(canvas_id: impl Into<String>, canvas_name: impl Into<String>) -> Self {
        Self {
            canvas_id: canvas_id.into(),
            canvas_name: canvas_name.into(),
        }
    }
}

/// Body of `GET /clients/{id}/workspaces/0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceState {
    #[serde(default, alias = "canvasId")]
    pub canvas_id: String,
    #[serde(default, alias = "canvasName")]
    pub canvas_name: String,
}

/// Body of `GET /canvases/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasResource {
    #[serde(default)]
    pub name: String,
}

/// Coarse lifecycle phase of the tracking service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPhase {
    #[default]
    Uninitialized,
    Resolving,
    Subscribing,
    Tracking,
    Stopped,
}

/// Status snapshot exposed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasStatus {
    pub canvas_id: String,
    pub canvas_name: String,
    pub client_id: String,
    pub client_name: String,
    pub installation_name: String,
    pub connected: bool,
    pub phase: TrackingPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Result of a successful override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideOutcome {
    pub client_name: String,
    pub client_id: String,
}
