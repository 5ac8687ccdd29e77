//! Database query functions for the `week_history` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::WeekSnapshot;

/// Insert a snapshot unless one already exists for its (plan, week).
///
/// Returns `true` if a row was written.
pub async fn insert_snapshot(pool: &PgPool, snapshot: &WeekSnapshot) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO week_history (plan_id, week_number, phase, weekly_plan, is_deload_week, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (plan_id, week_number) DO NOTHING",
    )
    .bind(snapshot.plan_id)
    .bind(snapshot.week_number)
    .bind(snapshot.phase)
    .bind(&snapshot.weekly_plan)
    .bind(snapshot.is_deload_week)
    .bind(snapshot.completed_at)
    .execute(pool)
    .await
    .context("failed to insert week snapshot")?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_snapshot(
    pool: &PgPool,
    plan_id: Uuid,
    week_number: i32,
) -> Result<Option<WeekSnapshot>> {
    let snapshot = sqlx::query_as::<_, WeekSnapshot>(
        "SELECT * FROM week_history WHERE plan_id = $1 AND week_number = $2",
    )
    .bind(plan_id)
    .bind(week_number)
    .fetch_optional(pool)
    .await
    .context("failed to fetch week snapshot")?;

    Ok(snapshot)
}

/// List the archived weeks of a plan in week order.
pub async fn list_history_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<WeekSnapshot>> {
    let snapshots = sqlx::query_as::<_, WeekSnapshot>(
        "SELECT * FROM week_history WHERE plan_id = $1 ORDER BY week_number ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list week history")?;

    Ok(snapshots)
}
