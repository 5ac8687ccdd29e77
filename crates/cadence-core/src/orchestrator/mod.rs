//! Generation orchestrator: turns one [`Candidate`] into a generated,
//! persisted, archived and announced week, under a lease.
//!
//! Each candidate runs as its own task. A shared semaphore bounds how many
//! run at once across every batch, and a failure or panic in one task never
//! reaches another.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use cadence_db::models::{
    GenerationLease, LeaseStatus, Periodization, Phase, Plan, UserPreferences,
};

use crate::archive::HistoryArchiver;
use crate::clock::Clock;
use crate::context::{self, PreviousWeek};
use crate::generator::WeekGenerator;
use crate::lease::{AcquireOutcome, LeaseConfig, LeaseError, LeaseManager};
use crate::notify::{Notifier, WeekReady};
use crate::phase::{PhaseConfig, PhaseMachine, PlanModel};
use crate::scanner::{Candidate, calculated_week};
use crate::store::PlanStore;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of candidates generating at the same time.
    pub max_concurrent: usize,
    /// Wall time limit for one generator call. Keep it below the lease
    /// duration so a slow call fails before its lease can be taken over.
    pub generator_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            generator_timeout: Duration::from_secs(25 * 60),
        }
    }
}

/// A week that was generated and written onto its plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedWeek {
    pub plan_id: Uuid,
    pub week: u32,
    pub phase: Phase,
    pub phase_changed: bool,
    pub is_deload: bool,
    pub lease_id: Uuid,
    pub attempt: i32,
}

/// Why a candidate was not attempted. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds a live lease for the same week.
    LeaseHeld,
    /// The week has a completed lease.
    AlreadyGenerated,
    /// The orchestrator stopped accepting work before this candidate ran.
    ShuttingDown,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("data error: {0}")]
    Data(String),

    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("generator error: {0}")]
    Generator(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

#[derive(Debug)]
pub enum GenerationOutcome {
    Generated(GeneratedWeek),
    Skipped(SkipReason),
    Failed(GenerationError),
}

/// Totals for one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &GenerationOutcome) {
        match outcome {
            GenerationOutcome::Generated(_) => self.generated += 1,
            GenerationOutcome::Skipped(_) => self.skipped += 1,
            GenerationOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// In-flight generation tasks of one batch.
pub struct DispatchHandle {
    tasks: JoinSet<(Candidate, GenerationOutcome)>,
    dispatched: usize,
}

impl DispatchHandle {
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Wait for every task of the batch and total their outcomes.
    pub async fn wait(mut self) -> DispatchSummary {
        let mut summary = DispatchSummary {
            dispatched: self.dispatched,
            ..DispatchSummary::default()
        };
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((_, outcome)) => summary.record(&outcome),
                Err(e) => {
                    tracing::error!(error = %e, "generation task panicked or was aborted");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Why a manual trigger was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRejection {
    NotFound,
    Unscheduled,
    Complete,
    AlreadyGenerated,
    InProgress,
    /// Storage could not be read.
    Unavailable,
}

/// Answer to a manual "generate the next week now" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub queued: bool,
    pub target_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<TriggerRejection>,
    pub reason: Option<String>,
}

impl TriggerResponse {
    fn rejected(
        target_week: Option<u32>,
        rejection: TriggerRejection,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            queued: false,
            target_week,
            rejection: Some(rejection),
            reason: Some(reason.into()),
        }
    }
}

pub struct Triggered {
    pub response: TriggerResponse,
    /// The queued run, when `response.queued` is set.
    pub handle: Option<JoinHandle<GenerationOutcome>>,
}

pub struct Orchestrator {
    store: Arc<dyn PlanStore>,
    generator: Arc<dyn WeekGenerator>,
    clock: Arc<dyn Clock>,
    leases: LeaseManager,
    phases: PhaseMachine,
    archiver: HistoryArchiver,
    notifier: Notifier,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PlanStore>,
        generator: Arc<dyn WeekGenerator>,
        clock: Arc<dyn Clock>,
        phase_config: PhaseConfig,
        lease_config: LeaseConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            leases: LeaseManager::new(store.clone(), clock.clone(), lease_config),
            phases: PhaseMachine::new(phase_config),
            archiver: HistoryArchiver::new(store.clone(), clock.clone()),
            notifier: Notifier::new(store.clone(), clock.clone()),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            store,
            generator,
            clock,
            config,
        }
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Stop starting new runs. Runs already holding a permit finish; queued
    /// ones resolve as [`SkipReason::ShuttingDown`].
    pub fn close(&self) {
        self.permits.close();
    }

    /// Spawn one task per candidate and return without waiting.
    pub fn dispatch(self: &Arc<Self>, candidates: Vec<Candidate>) -> DispatchHandle {
        let mut tasks = JoinSet::new();
        let dispatched = candidates.len();
        for candidate in candidates {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = this.run_permitted(candidate).await;
                (candidate, outcome)
            });
        }
        DispatchHandle { tasks, dispatched }
    }

    /// Queue generation of the week after a plan's current one.
    ///
    /// Never fails: anything that prevents queueing is reported in
    /// [`TriggerResponse::reason`].
    pub async fn trigger_now(self: &Arc<Self>, plan_id: Uuid) -> Triggered {
        let response = match self.manual_candidate(plan_id).await {
            Ok(candidate) => {
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move { this.run_permitted(candidate).await });
                tracing::info!(plan_id = %plan_id, week = candidate.target_week, "manual generation queued");
                return Triggered {
                    response: TriggerResponse {
                        queued: true,
                        target_week: Some(candidate.target_week),
                        rejection: None,
                        reason: None,
                    },
                    handle: Some(handle),
                };
            }
            Err(rejected) => rejected,
        };
        tracing::info!(
            plan_id = %plan_id,
            reason = response.reason.as_deref().unwrap_or_default(),
            "manual generation not queued"
        );
        Triggered {
            response,
            handle: None,
        }
    }

    async fn manual_candidate(&self, plan_id: Uuid) -> Result<Candidate, TriggerResponse> {
        let plan = match self.store.get_plan(plan_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => return Err(TriggerResponse::rejected(None, TriggerRejection::NotFound, "plan not found")),
            Err(e) => {
                return Err(TriggerResponse::rejected(
                    None,
                    TriggerRejection::Unavailable,
                    format!("failed to load plan: {e:#}"),
                ));
            }
        };
        let Some(periodization) = plan.periodization() else {
            return Err(TriggerResponse::rejected(
                None,
                TriggerRejection::Unscheduled,
                "plan has no periodization",
            ));
        };
        if periodization.is_complete() {
            return Err(TriggerResponse::rejected(
                None,
                TriggerRejection::Complete,
                "plan is complete",
            ));
        }

        let target_week = periodization.current_week() + 1;
        match self.leases.check(plan_id, target_week).await {
            Ok(check) if check.already_generated => {
                return Err(TriggerResponse::rejected(
                    Some(target_week),
                    TriggerRejection::AlreadyGenerated,
                    format!("week {target_week} was already generated"),
                ));
            }
            Ok(check) if check.blocks() => {
                return Err(TriggerResponse::rejected(
                    Some(target_week),
                    TriggerRejection::InProgress,
                    format!("week {target_week} is already being generated"),
                ));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(TriggerResponse::rejected(
                    Some(target_week),
                    TriggerRejection::Unavailable,
                    format!("failed to check lease: {e:#}"),
                ));
            }
        }

        Ok(Candidate {
            plan_id,
            user_id: plan.user_id,
            current_week: periodization.current_week(),
            target_week,
            calculated_week: calculated_week(plan.created_at, self.clock.now()),
        })
    }

    async fn run_permitted(self: Arc<Self>, candidate: Candidate) -> GenerationOutcome {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return GenerationOutcome::Skipped(SkipReason::ShuttingDown);
        };
        self.run_candidate(&candidate).await
    }

    /// Run one candidate to an outcome. Only ever called with a permit held
    /// by [`Orchestrator::dispatch`] or [`Orchestrator::trigger_now`], or
    /// directly by callers that do their own bounding.
    pub async fn run_candidate(&self, candidate: &Candidate) -> GenerationOutcome {
        let plan_id = candidate.plan_id;
        let week = candidate.target_week;

        let check = match self.leases.check(plan_id, week).await {
            Ok(check) => check,
            Err(e) => return self.failed(candidate, GenerationError::Lease(e.into())),
        };
        if check.already_generated {
            return self.skipped(candidate, SkipReason::AlreadyGenerated);
        }
        if check.blocks() {
            return self.skipped(candidate, SkipReason::LeaseHeld);
        }

        let lease = match self.leases.acquire(plan_id, candidate.user_id, week).await {
            Ok(AcquireOutcome::Acquired(lease)) => lease,
            Ok(AcquireOutcome::Held { .. }) => return self.skipped(candidate, SkipReason::LeaseHeld),
            Ok(AcquireOutcome::AlreadyGenerated { .. }) => {
                return self.skipped(candidate, SkipReason::AlreadyGenerated);
            }
            Err(e) => return self.failed(candidate, GenerationError::Lease(e.into())),
        };

        match self.generate_week(candidate, &lease).await {
            Ok(generated) => {
                if let Err(e) = self
                    .leases
                    .release(&lease, LeaseStatus::Completed, None)
                    .await
                {
                    // The week is already on the plan; a later writer loses
                    // the optimistic patch and cannot overwrite it.
                    tracing::warn!(plan_id = %plan_id, week, error = %e, "failed to complete lease");
                }
                self.announce(candidate, &generated).await;
                tracing::info!(
                    plan_id = %plan_id,
                    week,
                    phase = %generated.phase,
                    phase_changed = generated.phase_changed,
                    is_deload = generated.is_deload,
                    "week generated"
                );
                GenerationOutcome::Generated(generated)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(e) = self
                    .leases
                    .release(&lease, LeaseStatus::Failed, Some(&message))
                    .await
                {
                    tracing::warn!(plan_id = %plan_id, week, error = %e, "failed to fail lease");
                }
                self.failed(candidate, err)
            }
        }
    }

    /// Steps that run while the lease is held: load, advance, archive,
    /// generate, persist.
    async fn generate_week(
        &self,
        candidate: &Candidate,
        lease: &GenerationLease,
    ) -> Result<GeneratedWeek, GenerationError> {
        let (plan, periodization, preferences) = self.load(candidate).await?;
        let plan_id = plan.id;
        let current_week = periodization.current_week();
        let total_weeks = periodization.total_weeks();
        let target_week = candidate.target_week;
        let model = PlanModel::of(&periodization);

        if current_week + 1 != target_week {
            return Err(GenerationError::Data(format!(
                "plan is at week {current_week}, cannot generate week {target_week}"
            )));
        }

        let previous = self.previous_week(&plan, &periodization).await?;

        let advanced = self
            .phases
            .advance(&periodization)
            .map_err(|e| GenerationError::Data(e.to_string()))?;
        let new_phase = advanced.periodization.phase();
        let is_deload = self.phases.is_deload_week(model, target_week, total_weeks);

        if !plan.weekly_plan.is_null() {
            let current_is_deload = self.phases.is_deload_week(model, current_week, total_weeks);
            self.archiver
                .archive(
                    plan_id,
                    current_week,
                    periodization.phase(),
                    &plan.weekly_plan,
                    current_is_deload,
                )
                .await
                .map_err(|e| GenerationError::Persistence(format!("{e:#}")))?;
        }

        let weeks_until_event =
            self.phases
                .weeks_until_event(&periodization, target_week, self.clock.today());
        let ctx = context::build(
            previous.as_ref(),
            new_phase,
            advanced.phase_changed,
            is_deload,
            target_week,
            total_weeks,
            weeks_until_event,
        );

        tracing::debug!(
            plan_id = %plan_id,
            week = target_week,
            generator = self.generator.name(),
            "calling generator"
        );
        let content = match tokio::time::timeout(
            self.config.generator_timeout,
            self.generator.generate(&preferences, &ctx),
        )
        .await
        {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => return Err(GenerationError::Generator(format!("{e:#}"))),
            Err(_) => {
                return Err(GenerationError::Generator(format!(
                    "timed out after {:?}",
                    self.config.generator_timeout
                )));
            }
        };

        let patched = self
            .store
            .patch_plan_week(
                plan_id,
                current_week,
                &content,
                &advanced.periodization,
                self.clock.now(),
            )
            .await
            .map_err(|e| GenerationError::Persistence(format!("{e:#}")))?;
        if !patched {
            return Err(GenerationError::Persistence(format!(
                "plan {plan_id} is no longer at week {current_week}"
            )));
        }

        Ok(GeneratedWeek {
            plan_id,
            week: target_week,
            phase: new_phase,
            phase_changed: advanced.phase_changed,
            is_deload,
            lease_id: lease.id,
            attempt: lease.attempt,
        })
    }

    async fn load(
        &self,
        candidate: &Candidate,
    ) -> Result<(Plan, Periodization, UserPreferences), GenerationError> {
        let plan = self
            .store
            .get_plan(candidate.plan_id)
            .await
            .map_err(|e| GenerationError::Persistence(format!("{e:#}")))?
            .ok_or_else(|| GenerationError::Data(format!("plan {} not found", candidate.plan_id)))?;

        let periodization = plan
            .periodization()
            .cloned()
            .ok_or_else(|| GenerationError::Data("plan has no periodization".to_owned()))?;

        let preferences = self
            .store
            .get_user_preferences(plan.user_id)
            .await
            .map_err(|e| GenerationError::Persistence(format!("{e:#}")))?
            .ok_or_else(|| {
                GenerationError::Data(format!("user {} has no preferences", plan.user_id))
            })?;

        Ok((plan, periodization, preferences))
    }

    /// The week about to be superseded: its archived snapshot if there is
    /// one, otherwise the plan's current content.
    async fn previous_week(
        &self,
        plan: &Plan,
        periodization: &Periodization,
    ) -> Result<Option<PreviousWeek>, GenerationError> {
        let week = periodization.current_week();
        let snapshot = self
            .store
            .get_history_snapshot(plan.id, week)
            .await
            .map_err(|e| GenerationError::Persistence(format!("{e:#}")))?;
        if let Some(snapshot) = snapshot {
            return Ok(Some(PreviousWeek::from(&snapshot)));
        }
        if plan.weekly_plan.is_null() {
            return Ok(None);
        }
        Ok(Some(PreviousWeek {
            week_number: week,
            phase: periodization.phase(),
            weekly_plan: plan.weekly_plan.clone(),
        }))
    }

    async fn announce(&self, candidate: &Candidate, generated: &GeneratedWeek) {
        let event = WeekReady {
            plan_id: generated.plan_id,
            user_id: candidate.user_id,
            week: generated.week,
            phase: generated.phase,
            phase_changed: generated.phase_changed,
            is_deload: generated.is_deload,
        };
        if let Err(e) = self.notifier.week_ready(&event).await {
            tracing::warn!(
                plan_id = %generated.plan_id,
                week = generated.week,
                error = %e,
                "failed to create notification"
            );
        }
    }

    fn skipped(&self, candidate: &Candidate, reason: SkipReason) -> GenerationOutcome {
        tracing::info!(
            plan_id = %candidate.plan_id,
            week = candidate.target_week,
            reason = ?reason,
            "skipping generation"
        );
        GenerationOutcome::Skipped(reason)
    }

    fn failed(&self, candidate: &Candidate, error: GenerationError) -> GenerationOutcome {
        tracing::warn!(
            plan_id = %candidate.plan_id,
            week = candidate.target_week,
            error = %error,
            "generation failed"
        );
        GenerationOutcome::Failed(error)
    }
}
