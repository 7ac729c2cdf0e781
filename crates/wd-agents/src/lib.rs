//! Approval-gated execution for warden.
//!
//! Operations are classified by risk; high-risk ones are put to a human
//! reviewer over a message channel before they are executed, and every
//! processed request is recorded in an append-only audit log.

pub mod audit;
pub mod coordinator;
pub mod gateway;
pub mod intent;
pub mod ledger;
pub mod orchestrator;
pub mod poller;
pub mod risk;
