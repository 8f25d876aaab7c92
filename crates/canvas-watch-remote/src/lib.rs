//! Remote product API access.
//!
//! The rest of the system talks to the remote product only through the
//! [`RemoteApi`] trait. [`HttpRemoteApi`] is the production implementation;
//! tests substitute in-memory fakes.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use canvas_watch_core::error::Result;
use canvas_watch_core::types::{CanvasEvent, ClientInfo};

pub mod http;
pub mod resources;
pub mod sse;
pub mod subscriber;

pub use http::HttpRemoteApi;
pub use subscriber::{SubscriberSettings, WorkspaceSubscriber};

/// Live canvas updates for one client, as delivered by a single connection.
/// The stream ends when the connection does.
pub type CanvasEventStream = Pin<Box<dyn Stream<Item = Result<CanvasEvent>> + Send>>;

/// Logical operations offered by the remote product.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// `GET /clients`
    async fn list_clients(&self) -> Result<Vec<ClientInfo>>;

    /// Raw body of a resource path relative to the API base, e.g. `canvases/abc`.
    async fn get_resource(&self, path: &str) -> Result<Bytes>;

    /// Open one streaming connection to the live-update endpoint of `client_id`.
    async fn open_workspace_stream(&self, client_id: &str) -> Result<CanvasEventStream>;
}
