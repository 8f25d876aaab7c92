//! Long-lived, self-reconnecting workspace subscription for one client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use canvas_watch_core::error::CanvasWatchError;
use canvas_watch_core::types::CanvasEvent;

use crate::RemoteApi;

const ERROR_BUFFER: usize = 16;

/// Reconnect policy and channel sizing.
#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Silence on an open stream longer than this forces a reconnect.
    pub idle_timeout: Duration,
    pub event_buffer: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            event_buffer: 64,
        }
    }
}

/// Exponential backoff for the `attempt`-th consecutive failure (1-based),
/// capped at `max`.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(2_u32.saturating_pow(exponent)).min(max)
}

/// Maintains the live-update stream for a single client id.
///
/// Connection loss is handled internally: errors are reported on the error
/// channel for information only and the subscriber reconnects on its own.
/// Only cancellation of the scope passed to [`subscribe`](Self::subscribe)
/// stops it; both channels close when that happens.
pub struct WorkspaceSubscriber {
    api: Arc<dyn RemoteApi>,
    client_id: String,
    settings: SubscriberSettings,
}

impl WorkspaceSubscriber {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        client_id: impl Into<String>,
        settings: SubscriberSettings,
    ) -> Self {
        Self {
            api,
            client_id: client_id.into(),
            settings,
        }
    }

    /// Start the background connection. Returns the event and error channels.
    pub fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<CanvasEvent>, mpsc::Receiver<CanvasWatchError>) {
        let (event_tx, event_rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let (error_tx, error_rx) = mpsc::channel(ERROR_BUFFER);

        let api = self.api.clone();
        let client_id = self.client_id.clone();
        let settings = self.settings.clone();

        tokio::spawn(async move {
            run_subscription(api, client_id, settings, cancel, event_tx, error_tx).await;
        });

        (event_rx, error_rx)
    }
}

async fn run_subscription(
    api: Arc<dyn RemoteApi>,
    client_id: String,
    settings: SubscriberSettings,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<CanvasEvent>,
    error_tx: mpsc::Sender<CanvasWatchError>,
) {
    let mut failures: u32 = 0;

    'reconnect: loop {
        if cancel.is_cancelled() {
            break;
        }

        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = api.open_workspace_stream(&client_id) => opened,
        };

        match opened {
            Ok(mut stream) => {
                info!(client_id = %client_id, "Workspace subscription connected");
                failures = 0;

                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break 'reconnect,
                        item = tokio::time::timeout(settings.idle_timeout, stream.next()) => item,
                    };
                    let Ok(item) = item else {
                        warn!(
                            client_id = %client_id,
                            idle = ?settings.idle_timeout,
                            "Workspace stream idle, reconnecting"
                        );
                        report(
                            &error_tx,
                            CanvasWatchError::Stream("no data within idle timeout".into()),
                        );
                        break;
                    };

                    match item {
                        Some(Ok(event)) => {
                            debug!(
                                client_id = %client_id,
                                canvas_id = %event.canvas_id,
                                "Canvas event received"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => break 'reconnect,
                                sent = event_tx.send(event) => {
                                    if sent.is_err() {
                                        debug!(client_id = %client_id, "Event consumer gone");
                                        break 'reconnect;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(client_id = %client_id, %e, "Workspace stream failed");
                            report(&error_tx, e);
                            break;
                        }
                        None => {
                            warn!(client_id = %client_id, "Workspace stream closed by server");
                            report(
                                &error_tx,
                                CanvasWatchError::Stream("stream closed by server".into()),
                            );
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(client_id = %client_id, %e, "Failed to open workspace stream");
                report(&error_tx, e);
            }
        }

        failures = failures.saturating_add(1);
        let delay = reconnect_delay(
            failures,
            settings.reconnect_base_delay,
            settings.reconnect_max_delay,
        );
        debug!(client_id = %client_id, attempt = failures, ?delay, "Reconnecting workspace stream");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(client_id = %client_id, "Workspace subscription stopped");
}

/// Errors are informational; drop them if the consumer is behind.
fn report(error_tx: &mpsc::Sender<CanvasWatchError>, error: CanvasWatchError) {
    if let Err(mpsc::error::TrySendError::Full(dropped)) = error_tx.try_send(error) {
        debug!(error = %dropped, "Subscription error channel full, dropping error");
    }
}
