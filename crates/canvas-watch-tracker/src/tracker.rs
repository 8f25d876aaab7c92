//! Concurrency-safe holder of the current canvas.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The canvas a client is currently displaying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedCanvas {
    pub canvas_id: String,
    pub canvas_name: String,
}

#[derive(Default)]
struct TrackerState {
    /// Subscription generation whose writes are currently accepted.
    generation: u64,
    canvas: TrackedCanvas,
}

/// Holds the single current `(canvas_id, canvas_name)` pair.
///
/// Readers always see a pair written by one completed update. The tracker
/// also carries the subscription generation, so that background tasks of a
/// superseded generation can be rejected inside the same critical section
/// as the write itself.
#[derive(Default)]
pub struct CanvasTracker {
    state: RwLock<TrackerState>,
}

impl CanvasTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unconditional overwrite.
    pub fn update_canvas(&self, canvas_id: &str, canvas_name: &str) {
        let mut state = self.write();
        state.canvas = TrackedCanvas {
            canvas_id: canvas_id.to_string(),
            canvas_name: canvas_name.to_string(),
        };
    }

    pub fn canvas_id(&self) -> String {
        self.read().canvas.canvas_id.clone()
    }

    pub fn canvas_name(&self) -> String {
        self.read().canvas.canvas_name.clone()
    }

    /// `(canvas_id, canvas_name)` from a single update.
    pub fn canvas(&self) -> (String, String) {
        let state = self.read();
        (state.canvas.canvas_id.clone(), state.canvas.canvas_name.clone())
    }

    pub fn snapshot(&self) -> TrackedCanvas {
        self.read().canvas.clone()
    }

    pub fn has_canvas(&self) -> bool {
        !self.read().canvas.canvas_id.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Open a new generation: clear the canvas and stop accepting writes from
    /// every earlier generation. Returns the new generation.
    pub fn begin_generation(&self) -> u64 {
        let mut state = self.write();
        state.generation += 1;
        state.canvas = TrackedCanvas::default();
        state.generation
    }

    /// Stop accepting writes from the current generation while keeping the
    /// last canvas readable. Returns the new generation.
    pub fn retire_generation(&self) -> u64 {
        let mut state = self.write();
        state.generation += 1;
        state.generation
    }

    /// Overwrite the canvas if `generation` is still current.
    pub fn update_for_generation(
        &self,
        generation: u64,
        canvas_id: &str,
        canvas_name: &str,
    ) -> bool {
        let mut state = self.write();
        if state.generation != generation {
            return false;
        }
        state.canvas = TrackedCanvas {
            canvas_id: canvas_id.to_string(),
            canvas_name: canvas_name.to_string(),
        };
        true
    }

    /// Write only if `generation` is current and no canvas is known yet.
    /// The first source to report wins.
    pub fn claim_if_empty(&self, generation: u64, canvas_id: &str, canvas_name: &str) -> bool {
        let mut state = self.write();
        if state.generation != generation || !state.canvas.canvas_id.is_empty() {
            return false;
        }
        state.canvas = TrackedCanvas {
            canvas_id: canvas_id.to_string(),
            canvas_name: canvas_name.to_string(),
        };
        true
    }

    /// Set the name of `canvas_id` if it is still the current canvas of
    /// `generation`.
    pub fn fill_name(&self, generation: u64, canvas_id: &str, canvas_name: &str) -> bool {
        let mut state = self.write();
        if state.generation != generation || state.canvas.canvas_id != canvas_id {
            return false;
        }
        state.canvas.canvas_name = canvas_name.to_string();
        true
    }
}
