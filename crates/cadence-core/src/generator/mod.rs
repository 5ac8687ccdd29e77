//! The week generator port.
//!
//! Generation itself happens elsewhere (typically an LLM-backed service).
//! The scheduler only hands it the user's preferences and a
//! [`ProgressionContext`] and expects one week of plan content back.

mod command;

pub use command::CommandGenerator;

use anyhow::Result;
use async_trait::async_trait;

use cadence_db::models::UserPreferences;

use crate::context::ProgressionContext;

#[async_trait]
pub trait WeekGenerator: Send + Sync {
    /// Short name used in logs (e.g. "command").
    fn name(&self) -> &str;

    /// Produce the content of the week described by `context`.
    ///
    /// Errors are treated as transient: the attempt fails and the week is
    /// retried on a later scan.
    async fn generate(
        &self,
        preferences: &UserPreferences,
        context: &ProgressionContext,
    ) -> Result<serde_json::Value>;
}
