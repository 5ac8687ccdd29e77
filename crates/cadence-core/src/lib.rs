//! Periodized plan advancement: decides which plans need their next week,
//! generates each (plan, week) at most once, and records the outcome.

pub mod archive;
pub mod clock;
pub mod context;
pub mod generator;
pub mod lease;
pub mod notify;
pub mod orchestrator;
pub mod phase;
pub mod scanner;
pub mod scheduler;
pub mod store;
