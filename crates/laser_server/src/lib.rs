//! Streams generated animations to the pyramid's three lasers and turns wand
//! telemetry into drawable points.

pub mod config;
pub mod context;
pub mod frame;
pub mod metrics;
pub mod scheduler;
pub mod wand;
