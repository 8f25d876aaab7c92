//! CanvasService scenarios against an in-memory remote product.
//!
//! Run with: `cargo test -p canvas-watch-tracker --test service`

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use canvas_watch_core::error::{CanvasWatchError, Result};
use canvas_watch_core::types::{CanvasEvent, ClientInfo, TrackingPhase, WorkspaceState};
use canvas_watch_remote::{CanvasEventStream, RemoteApi, SubscriberSettings};
use canvas_watch_tracker::{
    CanvasService, ClientResolver, DeviceNameProvider, LivenessPolicy, ServiceSettings,
};

type EventSender = mpsc::UnboundedSender<Result<CanvasEvent>>;

#[derive(Default)]
struct FakeRemote {
    clients: Mutex<Vec<ClientInfo>>,
    list_fails: AtomicBool,
    workspaces: Mutex<HashMap<String, WorkspaceState>>,
    canvas_names: Mutex<HashMap<String, String>>,
    streams: Mutex<Vec<(String, EventSender)>>,
    workspace_requests: AtomicUsize,
}

impl FakeRemote {
    fn with_clients(clients: &[(&str, &str)]) -> Arc<Self> {
        let remote = Self::default();
        *remote.clients.lock().unwrap() = clients
            .iter()
            .map(|(id, installation_name)| ClientInfo {
                id: id.to_string(),
                installation_name: installation_name.to_string(),
                name: format!("{installation_name} display"),
            })
            .collect();
        Arc::new(remote)
    }

    fn set_workspace(&self, client_id: &str, canvas_id: &str, canvas_name: &str) {
        self.workspaces.lock().unwrap().insert(
            client_id.to_string(),
            WorkspaceState {
                canvas_id: canvas_id.to_string(),
                canvas_name: canvas_name.to_string(),
            },
        );
    }

    fn set_canvas_name(&self, canvas_id: &str, name: &str) {
        self.canvas_names
            .lock()
            .unwrap()
            .insert(canvas_id.to_string(), name.to_string());
    }

    /// Push an event on the most recent stream opened for `client_id`.
    fn push(&self, client_id: &str, event: CanvasEvent) -> bool {
        let streams = self.streams.lock().unwrap();
        streams
            .iter()
            .rev()
            .find(|(id, _)| id == client_id)
            .is_some_and(|(_, tx)| tx.send(Ok(event)).is_ok())
    }

    fn open_streams(&self) -> Vec<String> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn workspace_requests(&self) -> usize {
        self.workspace_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn list_clients(&self) -> Result<Vec<ClientInfo>> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(CanvasWatchError::Transport("connection refused".into()));
        }
        Ok(self.clients.lock().unwrap().clone())
    }

    async fn get_resource(&self, path: &str) -> Result<Bytes> {
        let not_found = || CanvasWatchError::Http {
            status: 404,
            path: path.to_string(),
        };

        if let Some(canvas_id) = path.strip_prefix("canvases/") {
            let name = self
                .canvas_names
                .lock()
                .unwrap()
                .get(canvas_id)
                .cloned()
                .ok_or_else(not_found)?;
            return Ok(Bytes::from(serde_json::json!({ "name": name }).to_string()));
        }

        if let Some(rest) = path.strip_prefix("clients/") {
            if let Some(client_id) = rest.strip_suffix("/workspaces/0") {
                self.workspace_requests.fetch_add(1, Ordering::SeqCst);
                let state = self
                    .workspaces
                    .lock()
                    .unwrap()
                    .get(client_id)
                    .cloned()
                    .unwrap_or_default();
                return Ok(Bytes::from(serde_json::to_vec(&state)?));
            }
        }

        Err(not_found())
    }

    async fn open_workspace_stream(&self, client_id: &str) -> Result<CanvasEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .unwrap()
            .push((client_id.to_string(), tx));
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Device name that can disappear mid-test.
struct SwitchableDevice {
    name: Mutex<Option<String>>,
}

impl SwitchableDevice {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(Some(name.to_string())),
        })
    }

    fn clear(&self) {
        *self.name.lock().unwrap() = None;
    }
}

impl DeviceNameProvider for SwitchableDevice {
    fn device_name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }
}

fn settings() -> ServiceSettings {
    ServiceSettings {
        liveness: LivenessPolicy::new(Duration::from_secs(30)),
        poll_initial_delay: Duration::from_secs(3),
        poll_attempts: 5,
        poll_interval: Duration::from_secs(3),
        name_backfill_delay: Duration::from_secs(5),
        subscriber: SubscriberSettings {
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(90),
            event_buffer: 16,
        },
    }
}

fn service_for(remote: &Arc<FakeRemote>, installation_name: &str) -> CanvasService {
    let resolver = ClientResolver::new(
        Some(installation_name.to_string()),
        SwitchableDevice::new("unused-host"),
    );
    CanvasService::new(remote.clone(), resolver, settings()).expect("service")
}

/// Let spawned tasks run; virtual time advances while everything is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test(start_paused = true)]
async fn test_construction_fails_without_any_installation_name() {
    let remote = FakeRemote::with_clients(&[]);
    let device = SwitchableDevice::new("host");
    device.clear();
    let resolver = ClientResolver::new(None, device);

    let result = CanvasService::new(remote, resolver, settings());
    assert!(matches!(
        result.err(),
        Some(CanvasWatchError::InstallationNameUnavailable)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_event_with_empty_name_is_backfilled() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    remote.set_canvas_name("x", "Demo");
    let service = service_for(&remote, "Room-A");

    service.start().await.unwrap();
    settle().await;
    assert!(remote.push("c1", CanvasEvent::new("x", "")));

    let tracker = service.tracker();
    wait_for(|| tracker.canvas() == ("x".to_string(), "Demo".to_string())).await;

    let status = service.status();
    assert_eq!(status.client_id, "c1");
    assert_eq!(status.installation_name, "Room-A");
    assert_eq!(status.phase, TrackingPhase::Tracking);
    assert!(status.connected);
    assert!(status.last_event_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_deferred_backfill_fills_late_name() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    let tracker = service.tracker();

    service.start().await.unwrap();
    settle().await;

    // Name lookup fails at event time: the canvas is tracked without a name.
    assert!(remote.push("c1", CanvasEvent::new("x", "")));
    settle().await;
    assert_eq!(tracker.canvas(), ("x".to_string(), String::new()));

    remote.set_canvas_name("x", "Late");
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(tracker.canvas(), ("x".to_string(), "Late".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_name_lookup_keeps_known_name() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    let tracker = service.tracker();

    service.start().await.unwrap();
    settle().await;
    assert!(remote.push("c1", CanvasEvent::new("a", "Alpha")));
    wait_for(|| tracker.canvas_id() == "a").await;

    // Same canvas, no name in the event, and "a" cannot be looked up.
    assert!(remote.push("c1", CanvasEvent::new("a", "")));
    settle().await;
    assert_eq!(tracker.canvas(), ("a".to_string(), "Alpha".to_string()));

    // A different canvas with an unknown name is tracked without one.
    assert!(remote.push("c1", CanvasEvent::new("b", "")));
    wait_for(|| tracker.canvas_id() == "b").await;
    assert_eq!(tracker.canvas_name(), "");
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_lifecycle() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    assert!(!service.is_connected());

    service.start().await.unwrap();
    assert!(service.is_connected(), "optimistic during grace period");

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!service.is_connected(), "grace period elapsed without events");

    assert!(remote.push("c1", CanvasEvent::new("x", "Demo")));
    wait_for(|| service.is_connected()).await;

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(service.is_connected(), "stays connected once events arrived");
}

#[tokio::test(start_paused = true)]
async fn test_start_resolution_failure_is_not_fatal() {
    let remote = FakeRemote::with_clients(&[("c2", "Room-B")]);
    let service = service_for(&remote, "Room-A");

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, CanvasWatchError::ClientNotFound(_)));
    assert!(service.client_id().is_none());
    assert!(!service.is_connected());
    assert_eq!(service.phase(), TrackingPhase::Uninitialized);

    let outcome = service.override_client("room-b").await.unwrap();
    assert_eq!(outcome.client_id, "c2");
    assert_eq!(outcome.client_name, "Room-B display");
    assert!(service.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_start_matching_is_case_sensitive() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "room-a");
    assert!(matches!(
        service.start().await,
        Err(CanvasWatchError::ClientNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_polling_fallback_populates_and_stops() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    remote.set_workspace("c1", "p", "");
    remote.set_canvas_name("p", "Polled");
    let service = service_for(&remote, "Room-A");

    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(
        service.tracker().canvas(),
        ("p".to_string(), "Polled".to_string())
    );
    assert_eq!(remote.workspace_requests(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(remote.workspace_requests(), 1, "no requests once the canvas is known");
}

#[tokio::test(start_paused = true)]
async fn test_polling_retries_until_attempts_exhausted() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");

    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(remote.workspace_requests(), 5);
    assert!(!service.tracker().has_canvas());
}

#[tokio::test(start_paused = true)]
async fn test_stream_first_suppresses_polling() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    remote.set_workspace("c1", "x", "Demo");
    let service = service_for(&remote, "Room-A");

    service.start().await.unwrap();
    settle().await;
    assert!(remote.push("c1", CanvasEvent::new("x", "Demo")));
    settle().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(remote.workspace_requests(), 0);
    assert_eq!(service.tracker().canvas_id(), "x");
}

#[tokio::test(start_paused = true)]
async fn test_stream_and_poll_in_same_window_converge() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    remote.set_workspace("c1", "x", "");
    remote.set_canvas_name("x", "Demo");
    let service = service_for(&remote, "Room-A");

    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(remote.push("c1", CanvasEvent::new("x", "")));

    let tracker = service.tracker();
    wait_for(|| tracker.canvas() == ("x".to_string(), "Demo".to_string())).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(tracker.canvas(), ("x".to_string(), "Demo".to_string()));
    assert!(remote.workspace_requests() <= 1);
}

#[tokio::test(start_paused = true)]
async fn test_override_supersedes_previous_subscription() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A"), ("c2", "Room-B")]);
    let service = service_for(&remote, "Room-A");
    let tracker = service.tracker();

    service.start().await.unwrap();
    settle().await;
    assert!(remote.push("c1", CanvasEvent::new("a", "Alpha")));
    wait_for(|| tracker.canvas_id() == "a").await;

    let outcome = service.override_client("Room-B").await.unwrap();
    assert_eq!(outcome.client_id, "c2");
    assert_eq!(tracker.canvas_id(), "", "tracker reset on override");
    assert_eq!(service.override_client_name().as_deref(), Some("Room-B"));

    // Late event from the old generation must never show up.
    remote.push("c1", CanvasEvent::new("stale", "Stale"));
    settle().await;
    assert_eq!(tracker.canvas_id(), "");

    wait_for(|| remote.open_streams() == vec!["c2".to_string()]).await;
    assert!(remote.push("c2", CanvasEvent::new("b", "Beta")));
    wait_for(|| tracker.canvas_id() == "b").await;
    assert_eq!(tracker.canvas_name(), "Beta");
    assert!(Arc::ptr_eq(&tracker, &service.tracker()));
}

#[tokio::test(start_paused = true)]
async fn test_empty_override_returns_to_installation() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A"), ("c2", "Room-B")]);
    let service = service_for(&remote, "Room-A");
    service.start().await.unwrap();

    service.override_client("Room-B").await.unwrap();
    let outcome = service.override_client("").await.unwrap();
    assert_eq!(outcome.client_id, "c1");
    assert!(service.override_client_name().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_empty_override_without_installation_name_leaves_state() {
    let remote = FakeRemote::with_clients(&[("host-1", "kiosk-7")]);
    let device = SwitchableDevice::new("kiosk-7");
    let resolver = ClientResolver::new(None, device.clone());
    let service = CanvasService::new(remote.clone(), resolver, settings()).unwrap();

    service.start().await.unwrap();
    settle().await;
    assert!(remote.push("host-1", CanvasEvent::new("a", "Alpha")));
    let tracker = service.tracker();
    wait_for(|| tracker.canvas_id() == "a").await;

    device.clear();
    let result = service.override_client("").await;
    assert!(matches!(
        result,
        Err(CanvasWatchError::InstallationNameUnavailable)
    ));

    assert_eq!(tracker.canvas(), ("a".to_string(), "Alpha".to_string()));
    assert_eq!(service.client_id().as_deref(), Some("host-1"));
    assert_eq!(service.phase(), TrackingPhase::Tracking);
    assert!(service.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_failed_override_keeps_current_target() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    service.start().await.unwrap();
    settle().await;
    assert!(remote.push("c1", CanvasEvent::new("a", "Alpha")));
    wait_for(|| service.tracker().canvas_id() == "a").await;

    let err = service.override_client("Room-Z").await.unwrap_err();
    assert!(matches!(err, CanvasWatchError::ClientNotFound(_)));
    assert_eq!(service.tracker().canvas_id(), "a");
    assert_eq!(remote.open_streams(), vec!["c1".to_string()]);

    // The Room-A subscription is still delivering.
    assert!(remote.push("c1", CanvasEvent::new("a2", "Alpha 2")));
    wait_for(|| service.tracker().canvas_id() == "a2").await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_overrides_leave_one_generation() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A"), ("c2", "Room-B"), ("c3", "Room-C")]);
    let service = service_for(&remote, "Room-A");
    service.start().await.unwrap();

    let (b, c) = tokio::join!(
        service.override_client("Room-B"),
        service.override_client("Room-C")
    );
    b.unwrap();
    c.unwrap();

    wait_for(|| remote.open_streams().len() == 1).await;
    let open = remote.open_streams();
    assert_eq!(Some(open[0].clone()), service.client_id());
}

#[tokio::test(start_paused = true)]
async fn test_client_name_survives_missing_listing() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    service.start().await.unwrap();
    assert_eq!(service.client_name(), "Room-A display");

    remote.clients.lock().unwrap().clear();
    service.verify_client_name().await;
    assert_eq!(service.client_name(), "Room-A display");

    remote.list_fails.store(true, Ordering::SeqCst);
    service.verify_client_name().await;
    assert_eq!(service.client_name(), "Room-A display");
}

#[tokio::test(start_paused = true)]
async fn test_client_name_refreshed_when_renamed() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    service.start().await.unwrap();

    remote.clients.lock().unwrap()[0].name = "Renamed wall".into();
    service.verify_client_name().await;
    assert_eq!(service.client_name(), "Renamed wall");
}

#[tokio::test(start_paused = true)]
async fn test_restart_keeps_override_target() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A"), ("c2", "Room-B")]);
    let service = service_for(&remote, "Room-A");
    service.start().await.unwrap();
    service.override_client("room-b").await.unwrap();

    let outcome = service.restart().await.unwrap();
    assert_eq!(outcome.client_id, "c2");
    assert_eq!(service.override_client_name().as_deref(), Some("room-b"));
}

#[tokio::test(start_paused = true)]
async fn test_restart_without_override_matches_exactly() {
    let remote = FakeRemote::with_clients(&[("lower", "room-a"), ("exact", "Room-A")]);
    let service = service_for(&remote, "Room-A");

    service.start().await.unwrap();
    assert_eq!(service.client_id().as_deref(), Some("exact"));

    let outcome = service.restart().await.unwrap();
    assert_eq!(outcome.client_id, "exact");
    let cleared = service.override_client("").await.unwrap();
    assert_eq!(cleared.client_id, "exact");
}

#[tokio::test(start_paused = true)]
async fn test_stop_retires_generation_but_keeps_canvas() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    let tracker = service.tracker();

    service.start().await.unwrap();
    settle().await;
    assert!(remote.push("c1", CanvasEvent::new("a", "Alpha")));
    wait_for(|| tracker.canvas_id() == "a").await;

    let running = tracker.generation();
    service.stop().await;
    assert!(tracker.generation() > running);
    assert!(!tracker.update_for_generation(running, "late", "Late"));
    assert_eq!(tracker.canvas(), ("a".to_string(), "Alpha".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_terminal() {
    let remote = FakeRemote::with_clients(&[("c1", "Room-A")]);
    let service = service_for(&remote, "Room-A");
    service.start().await.unwrap();
    settle().await;

    service.stop().await;
    service.stop().await;
    assert!(!service.is_connected());
    assert_eq!(service.phase(), TrackingPhase::Stopped);

    wait_for(|| remote.open_streams().is_empty()).await;
    assert!(!remote.push("c1", CanvasEvent::new("x", "X")));
    assert!(!service.tracker().has_canvas());

    service.start().await.unwrap();
    assert!(service.is_connected());
}
