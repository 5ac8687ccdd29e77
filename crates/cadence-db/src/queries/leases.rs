//! Database query functions for the `generation_leases` table.
//!
//! Acquire and finish are single statements so that concurrent schedulers
//! can race on them without an explicit transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{GenerationLease, LeaseStatus};

/// Fetch the lease for one (plan, target week) pair.
pub async fn get_lease(
    pool: &PgPool,
    plan_id: Uuid,
    target_week: i32,
) -> Result<Option<GenerationLease>> {
    let lease = sqlx::query_as::<_, GenerationLease>(
        "SELECT * FROM generation_leases WHERE plan_id = $1 AND target_week = $2",
    )
    .bind(plan_id)
    .bind(target_week)
    .fetch_optional(pool)
    .await
    .context("failed to fetch generation lease")?;

    Ok(lease)
}

pub async fn get_lease_by_id(pool: &PgPool, id: Uuid) -> Result<Option<GenerationLease>> {
    let lease = sqlx::query_as::<_, GenerationLease>("SELECT * FROM generation_leases WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch generation lease by id")?;

    Ok(lease)
}

/// List all leases of a plan, by target week.
pub async fn list_leases_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<GenerationLease>> {
    let leases = sqlx::query_as::<_, GenerationLease>(
        "SELECT * FROM generation_leases WHERE plan_id = $1 ORDER BY target_week ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list generation leases")?;

    Ok(leases)
}

/// Try to take the lease for (plan, target week).
///
/// Inserts a fresh `in_progress` row, or takes over an existing row that is
/// `failed` or `in_progress` with `started_at <= stale_before`. Taking over
/// bumps `attempt` and clears the previous outcome. Returns `None` when the
/// existing row is completed or still held.
pub async fn acquire_lease(
    pool: &PgPool,
    id: Uuid,
    plan_id: Uuid,
    user_id: Uuid,
    target_week: i32,
    started_at: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<Option<GenerationLease>> {
    let lease = sqlx::query_as::<_, GenerationLease>(
        "INSERT INTO generation_leases (id, plan_id, user_id, target_week, status, attempt, started_at) \
         VALUES ($1, $2, $3, $4, 'in_progress', 1, $5) \
         ON CONFLICT (plan_id, target_week) DO UPDATE \
         SET status = 'in_progress', \
             attempt = generation_leases.attempt + 1, \
             user_id = EXCLUDED.user_id, \
             started_at = EXCLUDED.started_at, \
             completed_at = NULL, \
             error = NULL \
         WHERE generation_leases.status = 'failed' \
            OR (generation_leases.status = 'in_progress' AND generation_leases.started_at <= $6) \
         RETURNING *",
    )
    .bind(id)
    .bind(plan_id)
    .bind(user_id)
    .bind(target_week)
    .bind(started_at)
    .bind(stale_before)
    .fetch_optional(pool)
    .await
    .context("failed to acquire generation lease")?;

    Ok(lease)
}

/// Move an `in_progress` lease to a terminal status.
///
/// Fenced by `attempt`: a holder whose lease was taken over cannot finish
/// the new holder's attempt. Returns `false` when nothing was updated.
pub async fn finish_lease(
    pool: &PgPool,
    id: Uuid,
    attempt: i32,
    status: LeaseStatus,
    error: Option<&str>,
    completed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE generation_leases SET status = $1, error = $2, completed_at = $3 \
         WHERE id = $4 AND attempt = $5 AND status = 'in_progress'",
    )
    .bind(status)
    .bind(error)
    .bind(completed_at)
    .bind(id)
    .bind(attempt)
    .execute(pool)
    .await
    .context("failed to finish generation lease")?;

    Ok(result.rows_affected() > 0)
}

/// List `in_progress` leases that started at or before `stale_before`.
pub async fn list_expired_leases(
    pool: &PgPool,
    stale_before: DateTime<Utc>,
) -> Result<Vec<GenerationLease>> {
    let leases = sqlx::query_as::<_, GenerationLease>(
        "SELECT * FROM generation_leases \
         WHERE status = 'in_progress' AND started_at <= $1 \
         ORDER BY started_at ASC",
    )
    .bind(stale_before)
    .fetch_all(pool)
    .await
    .context("failed to list expired generation leases")?;

    Ok(leases)
}
