//! Shared data model and configuration for warden.

pub mod config;
pub mod types;
