//! Write-once archive of finished weeks.

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use cadence_db::models::{Phase, WeekSnapshot};

use crate::clock::Clock;
use crate::store::PlanStore;

pub struct HistoryArchiver {
    store: Arc<dyn PlanStore>,
    clock: Arc<dyn Clock>,
}

impl HistoryArchiver {
    pub fn new(store: Arc<dyn PlanStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Snapshot `week` of a plan. A week that is already archived is left
    /// as it is; returns `true` only when a snapshot was written.
    pub async fn archive(
        &self,
        plan_id: Uuid,
        week: u32,
        phase: Phase,
        weekly_plan: &serde_json::Value,
        is_deload_week: bool,
    ) -> Result<bool> {
        let snapshot = WeekSnapshot {
            plan_id,
            week_number: i32::try_from(week).context("week number out of range")?,
            phase,
            weekly_plan: weekly_plan.clone(),
            is_deload_week,
            completed_at: self.clock.now(),
        };
        let written = self.store.put_history_snapshot(&snapshot).await?;
        if written {
            tracing::debug!(plan_id = %plan_id, week, %phase, "archived week");
        } else {
            tracing::debug!(plan_id = %plan_id, week, "week already archived");
        }
        Ok(written)
    }
}
