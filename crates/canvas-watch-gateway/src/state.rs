//! Gateway shared state.

use canvas_watch_tracker::CanvasService;

/// Shared state accessible from all handlers.
pub struct GatewayState {
    pub service: CanvasService,
}

impl GatewayState {
    pub fn new(service: CanvasService) -> Self {
        Self { service }
    }
}
