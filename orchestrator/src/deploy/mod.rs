//! Deployment lifecycle

pub mod fsm;
pub mod orchestrator;

pub use orchestrator::{Orchestrator, SyncOutcome, SyncReport};
