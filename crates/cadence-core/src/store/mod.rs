//! Storage port used by the scheduler.
//!
//! [`PlanStore`] is everything the scheduler reads or writes. Two
//! implementations exist: [`PgStore`] over `cadence-db`, and
//! [`InMemoryStore`] for tests and dry runs. Both must give lease acquire
//! and history insert the same atomic semantics.

mod memory;
mod pg;

pub use memory::InMemoryStore;
pub use pg::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use cadence_db::models::{
    GenerationLease, LeaseStatus, NewNotification, Notification, Periodization, Plan,
    UserPreferences, WeekSnapshot,
};

/// A lease row to create, or to take over an expired/failed row with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLease {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub user_id: Uuid,
    pub target_week: u32,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Every plan that has a periodization record.
    async fn list_periodized_plans(&self) -> Result<Vec<Plan>>;

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>>;

    async fn get_user_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>>;

    /// Write a generated week onto a plan if its stored `current_week` is
    /// still `expected_week`. Returns `false` if it was not.
    async fn patch_plan_week(
        &self,
        plan_id: Uuid,
        expected_week: u32,
        weekly_plan: &serde_json::Value,
        periodization: &Periodization,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get_history_snapshot(&self, plan_id: Uuid, week: u32)
    -> Result<Option<WeekSnapshot>>;

    /// Insert a snapshot unless its (plan, week) already exists. Returns
    /// `true` if it was written.
    async fn put_history_snapshot(&self, snapshot: &WeekSnapshot) -> Result<bool>;

    async fn get_lease(&self, plan_id: Uuid, target_week: u32) -> Result<Option<GenerationLease>>;

    async fn get_lease_by_id(&self, lease_id: Uuid) -> Result<Option<GenerationLease>>;

    async fn list_leases(&self, plan_id: Uuid) -> Result<Vec<GenerationLease>>;

    /// Atomically create the lease for `(plan_id, target_week)`, or take over
    /// an existing one that is `failed` or `in_progress` and started at or
    /// before `stale_before`. Returns `None` when the existing lease is
    /// `completed` or still held.
    async fn acquire_lease(
        &self,
        lease: &NewLease,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<GenerationLease>>;

    /// Move an `in_progress` lease owned by `(lease_id, attempt)` to a
    /// terminal status. Returns `false` if nothing matched.
    async fn finish_lease(
        &self,
        lease_id: Uuid,
        attempt: i32,
        status: LeaseStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn list_expired_leases(&self, stale_before: DateTime<Utc>) -> Result<Vec<GenerationLease>>;

    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification>;
}
