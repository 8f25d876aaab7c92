//! Canvas tracking service: lifecycle, event consumption, polling fallback,
//! override/restart, and status queries.
//!
//! Every `start`/`override_client`/`restart` opens a new *generation*. All
//! background tasks of a generation share one cancellation token and carry
//! the generation number; tracker writes are compare-and-write against the
//! tracker's current generation, so nothing from a superseded generation can
//! land after a newer one has begun.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use canvas_watch_core::config::TrackingConfig;
use canvas_watch_core::error::{CanvasWatchError, Result};
use canvas_watch_core::types::{
    CanvasEvent, CanvasStatus, ClientInfo, OverrideOutcome, TrackingPhase,
};
use canvas_watch_remote::resources::{fetch_canvas_name, fetch_workspace_state};
use canvas_watch_remote::{RemoteApi, SubscriberSettings, WorkspaceSubscriber};

use crate::liveness::LivenessPolicy;
use crate::resolver::{ClientResolver, MatchPolicy};
use crate::tracker::CanvasTracker;

/// Timing policy for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub liveness: LivenessPolicy,
    pub poll_initial_delay: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub name_backfill_delay: Duration,
    pub subscriber: SubscriberSettings,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&TrackingConfig::default())
    }
}

impl ServiceSettings {
    pub fn from_config(tracking: &TrackingConfig) -> Self {
        Self {
            liveness: LivenessPolicy::new(tracking.liveness_grace()),
            poll_initial_delay: tracking.poll_initial_delay(),
            poll_attempts: tracking.poll_attempts,
            poll_interval: tracking.poll_interval(),
            name_backfill_delay: tracking.name_backfill_delay(),
            subscriber: SubscriberSettings {
                reconnect_base_delay: tracking.reconnect_base_delay(),
                reconnect_max_delay: tracking.reconnect_max_delay(),
                idle_timeout: tracking.stream_idle_timeout(),
                ..SubscriberSettings::default()
            },
        }
    }
}

#[derive(Default)]
struct ServiceState {
    client_id: Option<String>,
    client_name: String,
    installation_name: String,
    override_client_name: Option<String>,
    phase: TrackingPhase,
    generation: u64,
    has_received_events: bool,
    last_event_at: Option<DateTime<Utc>>,
    subscription_started: Option<Instant>,
    /// Scope of the active generation; `None` when nothing is subscribed.
    cancel: Option<CancellationToken>,
}

struct Inner {
    api: Arc<dyn RemoteApi>,
    resolver: ClientResolver,
    tracker: Arc<CanvasTracker>,
    settings: ServiceSettings,
    state: Arc<Mutex<ServiceState>>,
    /// Serializes start/override/restart/stop.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
    }
}

/// Tracks which canvas the resolved client is displaying.
///
/// Cheap to clone; clones share the same tracker and lifecycle.
#[derive(Clone)]
pub struct CanvasService {
    inner: Arc<Inner>,
}

impl CanvasService {
    /// Fails fast when no installation name can be determined.
    pub fn new(
        api: Arc<dyn RemoteApi>,
        resolver: ClientResolver,
        settings: ServiceSettings,
    ) -> Result<Self> {
        let installation_name = resolver.installation_name()?;
        info!(%installation_name, "Canvas service created");

        let state = ServiceState {
            installation_name,
            ..ServiceState::default()
        };

        Ok(Self {
            inner: Arc::new(Inner {
                api,
                resolver,
                tracker: Arc::new(CanvasTracker::new()),
                settings,
                state: Arc::new(Mutex::new(state)),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        lock_state(&self.inner.state)
    }

    /// The tracker instance is stable for the lifetime of the service.
    pub fn tracker(&self) -> Arc<CanvasTracker> {
        self.inner.tracker.clone()
    }

    pub fn installation_name(&self) -> String {
        self.state().installation_name.clone()
    }

    pub fn client_id(&self) -> Option<String> {
        self.state().client_id.clone()
    }

    pub fn client_name(&self) -> String {
        self.state().client_name.clone()
    }

    pub fn override_client_name(&self) -> Option<String> {
        self.state().override_client_name.clone()
    }

    pub fn phase(&self) -> TrackingPhase {
        self.state().phase
    }

    /// Resolve this installation's client and begin tracking it.
    ///
    /// A resolution failure is returned, but the service stays usable for
    /// [`override_client`](Self::override_client).
    pub async fn start(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;

        let installation_name = self.installation_name();
        let previous = self.enter_resolving();
        let client = match self
            .inner
            .resolver
            .resolve_client(self.inner.api.as_ref(), &installation_name, MatchPolicy::Exact)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                warn!(%installation_name, %e, "Client resolution failed, automatic tracking off");
                self.state().phase = previous;
                return Err(e);
            }
        };

        self.launch(client, None);
        Ok(())
    }

    /// Re-target tracking at another client by installation name (case
    /// insensitive). An empty name clears the override and returns to this
    /// installation's own client.
    ///
    /// The new client is resolved before anything is torn down: on failure
    /// the current generation keeps running untouched.
    pub async fn override_client(&self, client_name: &str) -> Result<OverrideOutcome> {
        let _guard = self.inner.lifecycle.lock().await;
        self.restart_with_client_name(client_name).await
    }

    /// Re-resolve and resubscribe the current target (the override if one
    /// is set, otherwise this installation).
    pub async fn restart(&self) -> Result<OverrideOutcome> {
        let _guard = self.inner.lifecycle.lock().await;
        let target = self.override_client_name().unwrap_or_default();
        self.restart_with_client_name(&target).await
    }

    /// Cancel the active generation. Idempotent. The last tracked canvas
    /// stays readable, but no write from the stopped generation can land.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        let mut state = self.state();
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
            state.generation = self.inner.tracker.retire_generation();
            info!(client_id = ?state.client_id, "Canvas tracking stopped");
        }
        if state.phase != TrackingPhase::Uninitialized {
            state.phase = TrackingPhase::Stopped;
        }
    }

    /// Best-effort liveness; see [`LivenessPolicy`].
    pub fn is_connected(&self) -> bool {
        let state = self.state();
        if state.client_id.is_none() || state.cancel.is_none() {
            return false;
        }
        self.inner.settings.liveness.is_live(
            state.has_received_events,
            state.subscription_started,
            Instant::now(),
        )
    }

    pub fn status(&self) -> CanvasStatus {
        let (canvas_id, canvas_name) = self.inner.tracker.canvas();
        let connected = self.is_connected();
        let state = self.state();
        CanvasStatus {
            canvas_id,
            canvas_name,
            client_id: state.client_id.clone().unwrap_or_default(),
            client_name: state.client_name.clone(),
            installation_name: state.installation_name.clone(),
            connected,
            phase: state.phase,
            override_client_name: state.override_client_name.clone(),
            last_event_at: state.last_event_at,
        }
    }

    /// Confirm the resolved client still exists and refresh its display name.
    /// Never clears a known name.
    pub async fn verify_client_name(&self) {
        let (generation, client_id) = {
            let state = self.state();
            match &state.client_id {
                Some(id) => (state.generation, id.clone()),
                None => return,
            }
        };
        fetch_client_name(
            self.inner.api.as_ref(),
            &self.inner.state,
            generation,
            &client_id,
        )
        .await;
    }

    fn enter_resolving(&self) -> TrackingPhase {
        let mut state = self.state();
        std::mem::replace(&mut state.phase, TrackingPhase::Resolving)
    }

    async fn restart_with_client_name(&self, client_name: &str) -> Result<OverrideOutcome> {
        let requested = client_name.trim();

        let (target, override_name) = if requested.is_empty() {
            (self.inner.resolver.installation_name()?, None)
        } else {
            (requested.to_string(), Some(requested.to_string()))
        };

        // Operator-typed names ignore case; this installation's own name is
        // matched exactly, as at start.
        let policy = if override_name.is_some() {
            MatchPolicy::IgnoreCase
        } else {
            MatchPolicy::Exact
        };

        let previous = self.enter_resolving();
        let client = match self
            .inner
            .resolver
            .resolve_client(self.inner.api.as_ref(), &target, policy)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                warn!(%target, %e, "Override resolution failed; keeping current target");
                self.state().phase = previous;
                return Err(e);
            }
        };

        if override_name.is_none() {
            self.state().installation_name = target;
        }

        Ok(self.launch(client, override_name))
    }

    /// Supersede the current generation and start subscription, event loop,
    /// polling fallback and deferred backfill for `client`.
    fn launch(&self, client: ClientInfo, override_name: Option<String>) -> OverrideOutcome {
        let generation = self.inner.tracker.begin_generation();
        let cancel = CancellationToken::new();
        let client_name = client.display_name().to_string();

        {
            let mut state = self.state();
            if let Some(previous) = state.cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            state.generation = generation;
            state.client_id = Some(client.id.clone());
            state.client_name = client_name.clone();
            state.override_client_name = override_name;
            state.has_received_events = false;
            state.last_event_at = None;
            state.subscription_started = Some(Instant::now());
            state.phase = TrackingPhase::Subscribing;
        }

        info!(client_id = %client.id, %client_name, generation, "Subscribing to workspace");

        let subscriber = WorkspaceSubscriber::new(
            self.inner.api.clone(),
            client.id.clone(),
            self.inner.settings.subscriber.clone(),
        );
        let (events, errors) = subscriber.subscribe(cancel.clone());

        let worker = GenerationWorker {
            generation,
            client_id: client.id.clone(),
            cancel,
            api: self.inner.api.clone(),
            tracker: self.inner.tracker.clone(),
            state: self.inner.state.clone(),
            settings: self.inner.settings.clone(),
        };

        tokio::spawn(worker.clone().process_events(events, errors));
        tokio::spawn(worker.clone().poll_workspace_canvas_id());
        tokio::spawn(worker.backfill_after_delay());

        OverrideOutcome {
            client_name,
            client_id: client.id,
        }
    }
}

fn lock_state(state: &Mutex<ServiceState>) -> MutexGuard<'_, ServiceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Look the client up in a fresh listing and refresh its name. Any failure,
/// including the id having vanished from the listing, keeps the last known
/// name so the UI does not flicker on transient remote inconsistency.
async fn fetch_client_name(
    api: &dyn RemoteApi,
    state: &Mutex<ServiceState>,
    generation: u64,
    client_id: &str,
) {
    let clients = match api.list_clients().await {
        Ok(clients) => clients,
        Err(e) => {
            warn!(client_id, %e, "Could not verify client name; keeping last known");
            return;
        }
    };

    let Some(client) = clients.iter().find(|c| c.id == client_id) else {
        warn!(client_id, "Resolved client missing from listing; keeping last known name");
        return;
    };

    let name = client.display_name();
    if name.is_empty() {
        return;
    }
    let mut state = lock_state(state);
    if state.generation == generation && state.client_name != name {
        debug!(client_id, name, "Client name refreshed");
        state.client_name = name.to_string();
    }
}

/// Everything one generation's background tasks need.
#[derive(Clone)]
struct GenerationWorker {
    generation: u64,
    client_id: String,
    cancel: CancellationToken,
    api: Arc<dyn RemoteApi>,
    tracker: Arc<CanvasTracker>,
    state: Arc<Mutex<ServiceState>>,
    settings: ServiceSettings,
}

impl GenerationWorker {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.tracker.generation() == self.generation
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn record_event(&self) {
        let mut state = lock_state(&self.state);
        if state.generation != self.generation {
            return;
        }
        state.has_received_events = true;
        state.last_event_at = Some(Utc::now());
        state.phase = TrackingPhase::Tracking;
    }

    fn mark_tracking(&self) {
        let mut state = lock_state(&self.state);
        if state.generation == self.generation && state.phase == TrackingPhase::Subscribing {
            state.phase = TrackingPhase::Tracking;
        }
    }

    /// Canvas name lookup that gives up on cancellation.
    async fn canvas_name(&self, canvas_id: &str) -> Option<Result<String>> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            name = fetch_canvas_name(self.api.as_ref(), canvas_id) => Some(name),
        }
    }

    /// Single consumer of the subscription. Stream errors are logged only;
    /// reconnecting is the subscriber's job.
    async fn process_events(
        self,
        mut events: mpsc::Receiver<CanvasEvent>,
        mut errors: mpsc::Receiver<CanvasWatchError>,
    ) {
        let mut events_open = true;
        let mut errors_open = true;

        while events_open || errors_open {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => events_open = false,
                },
                error = errors.recv(), if errors_open => match error {
                    Some(e) => {
                        warn!(client_id = %self.client_id, %e, "Workspace subscription error");
                    }
                    None => errors_open = false,
                },
            }
        }

        debug!(client_id = %self.client_id, generation = self.generation, "Event loop finished");
    }

    async fn handle_event(&self, event: CanvasEvent) {
        if !self.is_current() {
            return;
        }
        self.record_event();

        let CanvasEvent {
            canvas_id,
            canvas_name,
        } = event;

        let canvas_name = if canvas_name.is_empty() {
            match self.canvas_name(&canvas_id).await {
                None => return,
                Some(Ok(name)) => name,
                Some(Err(e)) => {
                    debug!(%canvas_id, %e, "Canvas name backfill failed");
                    let (current_id, current_name) = self.tracker.canvas();
                    if current_id == canvas_id {
                        current_name
                    } else {
                        String::new()
                    }
                }
            }
        } else {
            canvas_name
        };

        if self.cancel.is_cancelled() {
            return;
        }
        if self
            .tracker
            .update_for_generation(self.generation, &canvas_id, &canvas_name)
        {
            info!(client_id = %self.client_id, %canvas_id, %canvas_name, "Canvas updated");
        }
    }

    /// Safety net for a slow first event: poll the workspace state directly
    /// until some source has populated the tracker.
    async fn poll_workspace_canvas_id(self) {
        if !self.pause(self.settings.poll_initial_delay).await {
            return;
        }

        let attempts = self.settings.poll_attempts;
        for attempt in 1..=attempts {
            if !self.is_current() {
                return;
            }
            if self.tracker.has_canvas() {
                debug!(client_id = %self.client_id, attempt, "Canvas known, polling fallback done");
                return;
            }

            let polled = tokio::select! {
                _ = self.cancel.cancelled() => return,
                polled = fetch_workspace_state(self.api.as_ref(), &self.client_id) => polled,
            };

            match polled {
                Ok(workspace) if !workspace.canvas_id.is_empty() => {
                    let name = if workspace.canvas_name.is_empty() {
                        match self.canvas_name(&workspace.canvas_id).await {
                            None => return,
                            Some(name) => name.unwrap_or_default(),
                        }
                    } else {
                        workspace.canvas_name
                    };
                    if self
                        .tracker
                        .claim_if_empty(self.generation, &workspace.canvas_id, &name)
                    {
                        self.mark_tracking();
                        info!(
                            client_id = %self.client_id,
                            canvas_id = %workspace.canvas_id,
                            attempt,
                            "Canvas found by polling"
                        );
                    }
                    return;
                }
                Ok(_) => {
                    debug!(client_id = %self.client_id, attempt, "Workspace has no canvas yet");
                }
                Err(e) => {
                    debug!(client_id = %self.client_id, attempt, %e, "Workspace poll failed");
                }
            }

            if attempt < attempts && !self.pause(self.settings.poll_interval).await {
                return;
            }
        }

        debug!(client_id = %self.client_id, attempts, "Polling fallback exhausted");
    }

    /// One-shot: after a short delay, fill in a missing canvas name and
    /// verify the client name.
    async fn backfill_after_delay(self) {
        if !self.pause(self.settings.name_backfill_delay).await || !self.is_current() {
            return;
        }

        let (canvas_id, canvas_name) = self.tracker.canvas();
        if !canvas_id.is_empty() && canvas_name.is_empty() {
            match self.canvas_name(&canvas_id).await {
                None => return,
                Some(Ok(name)) => {
                    if self.tracker.fill_name(self.generation, &canvas_id, &name) {
                        debug!(%canvas_id, %name, "Canvas name backfilled");
                    }
                }
                Some(Err(e)) => debug!(%canvas_id, %e, "Deferred canvas name backfill failed"),
            }
        }

        if self.is_current() {
            let api = self.api.as_ref();
            fetch_client_name(api, &self.state, self.generation, &self.client_id).await;
        }
    }
}
