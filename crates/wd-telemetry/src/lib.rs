//! Logging setup for warden binaries and integration tests.
//!
//! Everything in the workspace logs through the `tracing` facade; this crate
//! only decides how those events are rendered.

pub mod logging;
