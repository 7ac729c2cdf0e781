//! Third-party channel transports for warden approvals.

pub mod slack;
