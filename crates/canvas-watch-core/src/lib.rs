//! Core types, config, and errors for canvas-watch.

pub mod config;
pub mod error;
pub mod types;
