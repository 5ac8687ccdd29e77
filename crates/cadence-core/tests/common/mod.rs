//! Fixtures shared by the cadence-core integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use sqlx::types::Json;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use cadence_core::clock::FixedClock;
use cadence_core::context::ProgressionContext;
use cadence_core::generator::WeekGenerator;
use cadence_core::lease::LeaseConfig;
use cadence_core::orchestrator::{Orchestrator, OrchestratorConfig};
use cadence_core::phase::{PhaseConfig, PhaseMachine};
use cadence_core::scheduler::{Scheduler, SchedulerConfig};
use cadence_core::store::{InMemoryStore, NewLease, PlanStore};
use cadence_db::models::{
    EventSchedule, GenerationLease, LeaseStatus, NewNotification, Notification, Periodization,
    Plan, RollingSchedule, UserPreferences, WeekSnapshot,
};

/// Monday 2025-01-06 03:00 UTC. Every fixture plan is created at this time.
pub fn day0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 3, 0, 0).unwrap()
}

/// Generator that echoes the week it was asked for, with knobs for
/// failing, panicking, blocking and measuring concurrency.
#[derive(Default)]
pub struct ScriptedGenerator {
    contexts: Mutex<Vec<ProgressionContext>>,
    fail_once: Mutex<HashSet<u32>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    pub entered: Notify,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first attempt at each of `weeks`.
    pub fn failing_once(weeks: &[u32]) -> Self {
        Self {
            fail_once: Mutex::new(weeks.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Block every call until a permit is added to the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let generator = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (generator, gate)
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn contexts(&self) -> Vec<ProgressionContext> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeekGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        preferences: &UserPreferences,
        context: &ProgressionContext,
    ) -> Result<serde_json::Value> {
        self.contexts.lock().unwrap().push(context.clone());
        self.entered.notify_one();

        if preferences.preferences["panic"] == json!(true) {
            panic!("generator exploded");
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await?;
            permit.forget();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_once.lock().unwrap().remove(&context.target_week) {
            bail!("upstream model unavailable");
        }
        Ok(json!({
            "week": context.target_week,
            "phase": context.new_phase,
        }))
    }
}

/// Store whose plan patch always fails; everything else is in memory.
pub struct FailingPatchStore {
    pub inner: Arc<InMemoryStore>,
}

#[async_trait]
impl PlanStore for FailingPatchStore {
    async fn list_periodized_plans(&self) -> Result<Vec<Plan>> {
        self.inner.list_periodized_plans().await
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<Plan>> {
        self.inner.get_plan(plan_id).await
    }

    async fn get_user_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>> {
        self.inner.get_user_preferences(user_id).await
    }

    async fn patch_plan_week(
        &self,
        _plan_id: Uuid,
        _expected_week: u32,
        _weekly_plan: &serde_json::Value,
        _periodization: &Periodization,
        _at: DateTime<Utc>,
    ) -> Result<bool> {
        bail!("connection reset by peer")
    }

    async fn get_history_snapshot(&self, plan_id: Uuid, week: u32) -> Result<Option<WeekSnapshot>> {
        self.inner.get_history_snapshot(plan_id, week).await
    }

    async fn put_history_snapshot(&self, snapshot: &WeekSnapshot) -> Result<bool> {
        self.inner.put_history_snapshot(snapshot).await
    }

    async fn get_lease(&self, plan_id: Uuid, target_week: u32) -> Result<Option<GenerationLease>> {
        self.inner.get_lease(plan_id, target_week).await
    }

    async fn get_lease_by_id(&self, lease_id: Uuid) -> Result<Option<GenerationLease>> {
        self.inner.get_lease_by_id(lease_id).await
    }

    async fn list_leases(&self, plan_id: Uuid) -> Result<Vec<GenerationLease>> {
        self.inner.list_leases(plan_id).await
    }

    async fn acquire_lease(
        &self,
        lease: &NewLease,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<GenerationLease>> {
        self.inner.acquire_lease(lease, stale_before).await
    }

    async fn finish_lease(
        &self,
        lease_id: Uuid,
        attempt: i32,
        status: LeaseStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner
            .finish_lease(lease_id, attempt, status, error, at)
            .await
    }

    async fn list_expired_leases(&self, stale_before: DateTime<Utc>) -> Result<Vec<GenerationLease>> {
        self.inner.list_expired_leases(stale_before).await
    }

    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification> {
        self.inner.insert_notification(notification).await
    }
}

/// A scheduler wired to an in-memory store and a fixed clock.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(generator: Arc<dyn WeekGenerator>) -> Self {
        Self::build(generator, OrchestratorConfig::default(), None)
    }

    pub fn with_config(generator: Arc<dyn WeekGenerator>, config: OrchestratorConfig) -> Self {
        Self::build(generator, config, None)
    }

    /// Route the scheduler through `wrap(memory_store)` instead of the
    /// memory store itself.
    pub fn wrapped(
        generator: Arc<dyn WeekGenerator>,
        wrap: impl FnOnce(Arc<InMemoryStore>) -> Arc<dyn PlanStore> + 'static,
    ) -> Self {
        Self::build(generator, OrchestratorConfig::default(), Some(Box::new(wrap)))
    }

    #[allow(clippy::type_complexity)]
    fn build(
        generator: Arc<dyn WeekGenerator>,
        config: OrchestratorConfig,
        wrap: Option<Box<dyn FnOnce(Arc<InMemoryStore>) -> Arc<dyn PlanStore>>>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(day0()));
        let backing: Arc<dyn PlanStore> = match wrap {
            Some(wrap) => wrap(store.clone()),
            None => store.clone(),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            backing,
            generator,
            clock.clone(),
            PhaseConfig::default(),
            LeaseConfig::default(),
            config,
        ));
        let scheduler = Scheduler::new(orchestrator, SchedulerConfig::default());
        Self {
            store,
            clock,
            scheduler,
        }
    }

    /// Seed an event-anchored plan created at [`day0`], with preferences.
    pub async fn event_plan(&self, current_week: u32, total_weeks: u32) -> Plan {
        let phase = cadence_core::phase::PhaseAllocation::for_total(
            total_weeks,
            &PhaseConfig::default(),
        )
        .phase_of(current_week);
        let periodization = Periodization::EventAnchored(EventSchedule {
            current_week,
            total_weeks,
            phase,
            event_date: None,
        });
        self.seed(periodization, json!({"days_per_week": 4})).await
    }

    pub async fn rolling_plan(&self, current_week: u32, total_weeks: u32) -> Plan {
        let periodization = Periodization::RollingCycle(RollingSchedule {
            current_week,
            total_weeks,
            phase: PhaseMachine::cycle_phase(current_week),
        });
        self.seed(periodization, json!({"days_per_week": 3})).await
    }

    pub async fn seed(&self, periodization: Periodization, preferences: serde_json::Value) -> Plan {
        let week = periodization.current_week();
        let plan = Plan {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            weekly_plan: json!({"week": week}),
            periodization: Some(Json(periodization)),
            created_at: day0(),
            updated_at: day0(),
        };
        self.store.put_plan(plan.clone()).await;
        self.store.put_preferences(plan.user_id, preferences).await;
        plan
    }

    /// Move the clock to `days` after [`day0`].
    pub fn at_day(&self, days: i64) {
        self.clock.set(day0() + chrono::Duration::days(days));
    }

    pub async fn lease(&self, plan_id: Uuid, week: u32) -> GenerationLease {
        self.store.get_lease(plan_id, week).await.unwrap().unwrap()
    }

    pub async fn current_week(&self, plan_id: Uuid) -> u32 {
        self.store
            .plan(plan_id)
            .await
            .and_then(|p| p.periodization().map(Periodization::current_week))
            .unwrap()
    }
}

