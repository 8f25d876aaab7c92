//! Best-effort connectivity heuristic.
//!
//! This is not a correctness property: a subscription that has never
//! delivered an event is assumed to be "still connecting" for a grace
//! window, after which it is reported as disconnected.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    grace: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_GRACE)
    }
}

impl LivenessPolicy {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Once any event has arrived the subscription counts as live for good;
    /// before that, only within `grace` of `subscription_started`.
    pub fn is_live(
        &self,
        has_received_events: bool,
        subscription_started: Option<Instant>,
        now: Instant,
    ) -> bool {
        if has_received_events {
            return true;
        }
        subscription_started
            .is_some_and(|started| now.saturating_duration_since(started) < self.grace)
    }
}
