//! Database query functions for the `plans` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{Periodization, Plan};

/// Insert a new plan row and return it.
pub async fn insert_plan(
    pool: &PgPool,
    user_id: Uuid,
    weekly_plan: &serde_json::Value,
    periodization: Option<&Periodization>,
    created_at: DateTime<Utc>,
) -> Result<Plan> {
    let plan = sqlx::query_as::<_, Plan>(
        "INSERT INTO plans (user_id, weekly_plan, periodization, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $4) \
         RETURNING *",
    )
    .bind(user_id)
    .bind(weekly_plan)
    .bind(periodization.map(Json))
    .bind(created_at)
    .fetch_one(pool)
    .await
    .context("failed to insert plan")?;

    Ok(plan)
}

/// Fetch a single plan by ID.
pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch plan")?;

    Ok(plan)
}

/// List every plan that carries a periodization record, oldest first.
pub async fn list_periodized_plans(pool: &PgPool) -> Result<Vec<Plan>> {
    let plans = sqlx::query_as::<_, Plan>(
        "SELECT * FROM plans WHERE periodization IS NOT NULL ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list periodized plans")?;

    Ok(plans)
}

/// Replace the weekly content and periodization of a plan, but only while
/// its stored `current_week` still equals `expected_week`.
///
/// Returns `false` when the plan is missing or another writer already moved
/// it past `expected_week`.
pub async fn patch_plan_week(
    pool: &PgPool,
    id: Uuid,
    expected_week: i32,
    weekly_plan: &serde_json::Value,
    periodization: &Periodization,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE plans SET weekly_plan = $1, periodization = $2, updated_at = $3 \
         WHERE id = $4 AND (periodization->>'current_week')::int = $5",
    )
    .bind(weekly_plan)
    .bind(Json(periodization))
    .bind(updated_at)
    .bind(id)
    .bind(expected_week)
    .execute(pool)
    .await
    .context("failed to patch plan week")?;

    Ok(result.rows_affected() > 0)
}
