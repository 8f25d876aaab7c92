//! HTTP gateway for the canvas tracking service.
//!
//! Presentation surfaces poll `/api/canvas/status` to learn which canvas the
//! tracked client is showing, and operators re-target or restart tracking
//! through the control endpoints.

pub mod routes;
pub mod server;
pub mod state;

pub use server::{router, start_gateway};
pub use state::GatewayState;
