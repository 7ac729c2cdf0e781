//! Harness for warden: the boundary between approval logic and the outside
//! world.
//!
//! - Message channel abstraction and payload normalisation
//! - Rate-limit hint parsing for channel transports
//! - Workspace path confinement
//! - Filesystem execution of approved operations
//! - A file-backed channel for local use and tests

pub mod channel;
pub mod executor;
pub mod file_channel;
pub mod payload;
pub mod retry;
pub mod security;
