use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use cadence_db::models::{
    GenerationLease, LeaseStatus, NewNotification, Notification, Periodization, Plan,
    UserPreferences, WeekSnapshot,
};
use cadence_db::queries::{history, leases, notifications, plans, preferences};

use super::{NewLease, PlanStore};

/// [`PlanStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn week_column(week: u32) -> Result<i32> {
    i32::try_from(week).with_context(|| format!("week number {week} out of range"))
}

#[async_trait]
impl PlanStore for PgStore {
    async fn list_periodized_plans(&self) -> Result<Vec<Plan>> {
        plans::list_periodized_plans(&self.pool).await
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        plans::get_plan(&self.pool, plan_id).await
    }

    async fn get_user_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>> {
        preferences::get_preferences(&self.pool, user_id).await
    }

    async fn patch_plan_week(
        &self,
        plan_id: Uuid,
        expected_week: u32,
        weekly_plan: &serde_json::Value,
        periodization: &Periodization,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        plans::patch_plan_week(
            &self.pool,
            plan_id,
            week_column(expected_week)?,
            weekly_plan,
            periodization,
            at,
        )
        .await
    }

    async fn get_history_snapshot(
        &self,
        plan_id: Uuid,
        week: u32,
    ) -> Result<Option<WeekSnapshot>> {
        history::get_snapshot(&self.pool, plan_id, week_column(week)?).await
    }

    async fn put_history_snapshot(&self, snapshot: &WeekSnapshot) -> Result<bool> {
        history::insert_snapshot(&self.pool, snapshot).await
    }

    async fn get_lease(&self, plan_id: Uuid, target_week: u32) -> Result<Option<GenerationLease>> {
        leases::get_lease(&self.pool, plan_id, week_column(target_week)?).await
    }

    async fn get_lease_by_id(&self, lease_id: Uuid) -> Result<Option<GenerationLease>> {
        leases::get_lease_by_id(&self.pool, lease_id).await
    }

    async fn list_leases(&self, plan_id: Uuid) -> Result<Vec<GenerationLease>> {
        leases::list_leases_for_plan(&self.pool, plan_id).await
    }

    async fn acquire_lease(
        &self,
        lease: &NewLease,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<GenerationLease>> {
        leases::acquire_lease(
            &self.pool,
            lease.id,
            lease.plan_id,
            lease.user_id,
            week_column(lease.target_week)?,
            lease.started_at,
            stale_before,
        )
        .await
    }

    async fn finish_lease(
        &self,
        lease_id: Uuid,
        attempt: i32,
        status: LeaseStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        leases::finish_lease(&self.pool, lease_id, attempt, status, error, at).await
    }

    async fn list_expired_leases(&self, stale_before: DateTime<Utc>) -> Result<Vec<GenerationLease>> {
        leases::list_expired_leases(&self.pool, stale_before).await
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification> {
        notifications::insert_notification(&self.pool, notification).await
    }
}
