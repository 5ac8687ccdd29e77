//! PostgreSQL persistence for cadence: row models, connection pool and
//! migrations, and one query module per table.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
