//! Typed helpers over [`RemoteApi::get_resource`].

use canvas_watch_core::error::{CanvasWatchError, Result};
use canvas_watch_core::types::{CanvasResource, WorkspaceState};

use crate::RemoteApi;

pub fn workspace_state_path(client_id: &str) -> String {
    format!("clients/{}/workspaces/0", urlencoding::encode(client_id))
}

pub fn canvas_path(canvas_id: &str) -> String {
    format!("canvases/{}", urlencoding::encode(canvas_id))
}

/// Current workspace state of a client, read directly rather than streamed.
pub async fn fetch_workspace_state(api: &dyn RemoteApi, client_id: &str) -> Result<WorkspaceState> {
    let body = api.get_resource(&workspace_state_path(client_id)).await?;
    serde_json::from_slice(&body).map_err(|e| CanvasWatchError::Decode(e.to_string()))
}

/// Display name of a canvas. An empty name is reported as a decode error so
/// callers never overwrite a known name with nothing.
pub async fn fetch_canvas_name(api: &dyn RemoteApi, canvas_id: &str) -> Result<String> {
    let body = api.get_resource(&canvas_path(canvas_id)).await?;
    let canvas: CanvasResource =
        serde_json::from_slice(&body).map_err(|e| CanvasWatchError::Decode(e.to_string()))?;
    if canvas.name.is_empty() {
        return Err(CanvasWatchError::Decode(format!(
            "canvas {canvas_id} has no name"
        )));
    }
    Ok(canvas.name)
}
