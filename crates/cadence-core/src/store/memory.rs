//! In-memory [`PlanStore`].
//!
//! All state sits behind one mutex, so every operation is atomic with
//! respect to every other. That is the same guarantee the PostgreSQL
//! store gets from its unique keys and conditional writes.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use cadence_db::models::{
    GenerationLease, LeaseStatus, NewNotification, Notification, Periodization, Plan,
    UserPreferences, WeekSnapshot,
};

use super::{NewLease, PlanStore};

#[derive(Default)]
struct State {
    plans: HashMap<Uuid, Plan>,
    preferences: HashMap<Uuid, UserPreferences>,
    history: BTreeMap<(Uuid, i32), WeekSnapshot>,
    leases: BTreeMap<(Uuid, i32), GenerationLease>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

fn week_key(week: u32) -> Result<i32> {
    i32::try_from(week).with_context(|| format!("week number {week} out of range"))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a plan.
    pub async fn put_plan(&self, plan: Plan) {
        self.state.lock().await.plans.insert(plan.id, plan);
    }

    /// Insert or replace a user's generator preferences.
    pub async fn put_preferences(&self, user_id: Uuid, preferences: serde_json::Value) {
        let prefs = UserPreferences {
            user_id,
            preferences,
            updated_at: Utc::now(),
        };
        self.state.lock().await.preferences.insert(user_id, prefs);
    }

    pub async fn plan(&self, plan_id: Uuid) -> Option<Plan> {
        self.state.lock().await.plans.get(&plan_id).cloned()
    }

    /// Archived weeks of a plan, in week order.
    pub async fn history(&self, plan_id: Uuid) -> Vec<WeekSnapshot> {
        self.state
            .lock()
            .await
            .history
            .values()
            .filter(|s| s.plan_id == plan_id)
            .cloned()
            .collect()
    }

    /// All notifications in insertion order.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    /// Total number of lease rows, across all plans.
    pub async fn lease_count(&self) -> usize {
        self.state.lock().await.leases.len()
    }
}

#[async_trait]
impl PlanStore for InMemoryStore {
    async fn list_periodized_plans(&self) -> Result<Vec<Plan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<Plan> = state
            .plans
            .values()
            .filter(|p| p.periodization.is_some())
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        Ok(self.plan(plan_id).await)
    }

    async fn get_user_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>> {
        Ok(self.state.lock().await.preferences.get(&user_id).cloned())
    }

    async fn patch_plan_week(
        &self,
        plan_id: Uuid,
        expected_week: u32,
        weekly_plan: &serde_json::Value,
        periodization: &Periodization,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(plan) = state.plans.get_mut(&plan_id) else {
            return Ok(false);
        };
        let stored_week = plan.periodization().map(Periodization::current_week);
        if stored_week != Some(expected_week) {
            return Ok(false);
        }
        plan.weekly_plan = weekly_plan.clone();
        plan.periodization = Some(Json(periodization.clone()));
        plan.updated_at = at;
        Ok(true)
    }

    async fn get_history_snapshot(
        &self,
        plan_id: Uuid,
        week: u32,
    ) -> Result<Option<WeekSnapshot>> {
        let key = (plan_id, week_key(week)?);
        Ok(self.state.lock().await.history.get(&key).cloned())
    }

    async fn put_history_snapshot(&self, snapshot: &WeekSnapshot) -> Result<bool> {
        let mut state = self.state.lock().await;
        let key = (snapshot.plan_id, snapshot.week_number);
        if state.history.contains_key(&key) {
            return Ok(false);
        }
        state.history.insert(key, snapshot.clone());
        Ok(true)
    }

    async fn get_lease(&self, plan_id: Uuid, target_week: u32) -> Result<Option<GenerationLease>> {
        let key = (plan_id, week_key(target_week)?);
        Ok(self.state.lock().await.leases.get(&key).cloned())
    }

    async fn get_lease_by_id(&self, lease_id: Uuid) -> Result<Option<GenerationLease>> {
        let state = self.state.lock().await;
        Ok(state.leases.values().find(|l| l.id == lease_id).cloned())
    }

    async fn list_leases(&self, plan_id: Uuid) -> Result<Vec<GenerationLease>> {
        let state = self.state.lock().await;
        Ok(state
            .leases
            .values()
            .filter(|l| l.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn acquire_lease(
        &self,
        lease: &NewLease,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<GenerationLease>> {
        let key = (lease.plan_id, week_key(lease.target_week)?);
        let mut state = self.state.lock().await;

        let Some(existing) = state.leases.get_mut(&key) else {
            let row = GenerationLease {
                id: lease.id,
                plan_id: lease.plan_id,
                user_id: lease.user_id,
                target_week: key.1,
                status: LeaseStatus::InProgress,
                attempt: 1,
                started_at: lease.started_at,
                completed_at: None,
                error: None,
            };
            state.leases.insert(key, row.clone());
            return Ok(Some(row));
        };

        let takeover = match existing.status {
            LeaseStatus::Failed => true,
            LeaseStatus::InProgress => existing.started_at <= stale_before,
            LeaseStatus::Completed => false,
        };
        if !takeover {
            return Ok(None);
        }

        existing.status = LeaseStatus::InProgress;
        existing.attempt += 1;
        existing.user_id = lease.user_id;
        existing.started_at = lease.started_at;
        existing.completed_at = None;
        existing.error = None;
        Ok(Some(existing.clone()))
    }

    async fn finish_lease(
        &self,
        lease_id: Uuid,
        attempt: i32,
        status: LeaseStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(lease) = state.leases.values_mut().find(|l| {
            l.id == lease_id && l.attempt == attempt && l.status == LeaseStatus::InProgress
        }) else {
            return Ok(false);
        };
        lease.status = status;
        lease.error = error.map(str::to_owned);
        lease.completed_at = Some(at);
        Ok(true)
    }

    async fn list_expired_leases(&self, stale_before: DateTime<Utc>) -> Result<Vec<GenerationLease>> {
        let state = self.state.lock().await;
        let mut expired: Vec<GenerationLease> = state
            .leases
            .values()
            .filter(|l| l.status == LeaseStatus::InProgress && l.started_at <= stale_before)
            .cloned()
            .collect();
        expired.sort_by_key(|l| l.started_at);
        Ok(expired)
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification> {
        let stored = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title.clone(),
            body: notification.body.clone(),
            payload: notification.payload.clone(),
            read: false,
            created_at: notification.created_at,
        };
        self.state.lock().await.notifications.push(stored.clone());
        Ok(stored)
    }
}
