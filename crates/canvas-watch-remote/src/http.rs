//! reqwest-backed [`RemoteApi`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_stream::StreamExt;
use tracing::debug;

use canvas_watch_core::error::{CanvasWatchError, Result};
use canvas_watch_core::types::{CanvasEvent, ClientInfo};

use crate::sse::{SseEvent, parse_sse_stream};
use crate::{CanvasEventStream, RemoteApi};

const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the remote product's REST and live-update endpoints.
///
/// The bearer credential is passed through as-is; token lifecycle is the
/// caller's concern.
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    list_timeout: Duration,
    request_timeout: Duration,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
            list_timeout: DEFAULT_LIST_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the client-listing and one-shot resource timeouts.
    pub fn with_timeouts(mut self, list_timeout: Duration, request_timeout: Duration) -> Self {
        self.list_timeout = list_timeout;
        self.request_timeout = request_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(self.url(path));
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_checked(
        &self,
        req: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CanvasWatchError::Http {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response)
    }
}

/// Decode one SSE event into a canvas update.
///
/// Returns `None` for events that carry no canvas id (heartbeats and other
/// event kinds), so they can be skipped without surfacing an error.
pub fn decode_canvas_event(event: &SseEvent) -> Option<Result<CanvasEvent>> {
    let value: serde_json::Value = match serde_json::from_str(&event.data) {
        Ok(v) => v,
        Err(e) => return Some(Err(CanvasWatchError::Decode(e.to_string()))),
    };

    let canvas_id = value
        .get("canvas_id")
        .or_else(|| value.get("canvasId"))
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())?;

    let canvas_name = value
        .get("canvas_name")
        .or_else(|| value.get("canvasName"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    Some(Ok(CanvasEvent::new(canvas_id, canvas_name)))
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn list_clients(&self) -> Result<Vec<ClientInfo>> {
        let path = "clients";
        let response = self
            .send_checked(self.get(path).timeout(self.list_timeout), path)
            .await?;
        let clients = response
            .json::<Vec<ClientInfo>>()
            .await
            .map_err(|e| CanvasWatchError::Decode(e.to_string()))?;
        debug!(count = clients.len(), "Listed remote clients");
        Ok(clients)
    }

    async fn get_resource(&self, path: &str) -> Result<Bytes> {
        let response = self
            .send_checked(self.get(path).timeout(self.request_timeout), path)
            .await?;
        Ok(response.bytes().await?)
    }

    async fn open_workspace_stream(&self, client_id: &str) -> Result<CanvasEventStream> {
        let path = format!(
            "clients/{}/workspaces/0/events",
            urlencoding::encode(client_id)
        );
        let req = self.get(&path).header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.send_checked(req, &path).await?;
        debug!(client_id, "Workspace event stream opened");

        let events = parse_sse_stream(response).filter_map(|item| match item {
            Ok(sse) => decode_canvas_event(&sse),
            Err(e) => Some(Err(e)),
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
            id: None,
        }
    }

    #[test]
    fn test_url_joining() {
        let api = HttpRemoteApi::new("https://api.example.com/v3/", None);
        assert_eq!(api.base_url(), "https://api.example.com/v3");
        assert_eq!(api.url("/clients"), "https://api.example.com/v3/clients");
        assert_eq!(api.url("canvases/x"), "https://api.example.com/v3/canvases/x");
    }

    #[test]
    fn test_decode_canvas_event() {
        let event = decode_canvas_event(&sse(r#"{"canvas_id":"x","canvas_name":"Demo"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(event, CanvasEvent::new("x", "Demo"));

        let camel = decode_canvas_event(&sse(r#"{"canvasId":"y"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(camel, CanvasEvent::new("y", ""));
    }

    #[test]
    fn test_decode_skips_heartbeat() {
        assert!(decode_canvas_event(&sse(r#"{"type":"ping"}"#)).is_none());
        assert!(decode_canvas_event(&sse(r#"{"canvas_id":""}"#)).is_none());
    }

    #[test]
    fn test_decode_malformed_is_error() {
        let result = decode_canvas_event(&sse("not json")).unwrap();
        assert!(matches!(result, Err(CanvasWatchError::Decode(_))));
    }
}
