//! Query functions, one module per table.

pub mod history;
pub mod leases;
pub mod notifications;
pub mod plans;
pub mod preferences;
