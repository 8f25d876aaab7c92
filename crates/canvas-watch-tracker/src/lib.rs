//! Canvas tracking: which canvas is a given client installation showing?
//!
//! [`CanvasService`] resolves the installation's client identity, keeps a live
//! workspace subscription open (with a polling fallback), and publishes the
//! result through a shared [`CanvasTracker`].

pub mod liveness;
pub mod resolver;
pub mod service;
pub mod tracker;

pub use liveness::LivenessPolicy;
pub use resolver::{ClientResolver, DeviceNameProvider, HostnameProvider, MatchPolicy};
pub use service::{CanvasService, ServiceSettings};
pub use tracker::{CanvasTracker, TrackedCanvas};
