//! Generation leases: at most one live attempt per (plan, target week).
//!
//! A lease is a row, not a lock. An `in_progress` lease older than the
//! configured duration counts as abandoned and may be taken over. A
//! `completed` lease is permanent. Every takeover bumps the lease's
//! `attempt`, and releases are fenced on it so a slow, superseded run can
//! never overwrite the outcome of the run that replaced it.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use cadence_db::models::{GenerationLease, LeaseStatus};

use crate::clock::Clock;
use crate::store::{NewLease, PlanStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Age at which an `in_progress` lease is considered abandoned.
    pub duration: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration: Duration::minutes(30),
        }
    }
}

/// What a reader may conclude from the lease row of a (plan, week).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeaseCheck {
    pub locked: bool,
    pub already_generated: bool,
    pub expired: bool,
}

impl LeaseCheck {
    pub fn evaluate(lease: Option<&GenerationLease>, now: DateTime<Utc>, duration: Duration) -> Self {
        let Some(lease) = lease else {
            return Self::default();
        };
        match lease.status {
            LeaseStatus::Completed => Self {
                locked: true,
                already_generated: true,
                expired: false,
            },
            LeaseStatus::Failed => Self::default(),
            LeaseStatus::InProgress => {
                let expired = now - lease.started_at >= duration;
                Self {
                    locked: !expired,
                    already_generated: false,
                    expired,
                }
            }
        }
    }

    /// `true` when another attempt must not start.
    pub fn blocks(&self) -> bool {
        self.locked && !self.expired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now owns this lease.
    Acquired(GenerationLease),
    /// Another run holds a live lease. Nothing was changed.
    Held { lease_id: Uuid },
    /// The week was already generated.
    AlreadyGenerated { lease_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The lease already had the requested terminal status.
    AlreadyReleased,
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease {lease_id} not found")]
    NotFound { lease_id: Uuid },

    #[error("lease {lease_id} attempt {attempt} was superseded by attempt {current_attempt}")]
    Superseded {
        lease_id: Uuid,
        attempt: i32,
        current_attempt: i32,
    },

    #[error("lease {lease_id} already finished as {status}")]
    AlreadyFinished { lease_id: Uuid, status: LeaseStatus },

    #[error("cannot release lease {lease_id} to non-terminal status {status}")]
    NotTerminal { lease_id: Uuid, status: LeaseStatus },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct LeaseManager {
    store: Arc<dyn PlanStore>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn PlanStore>, clock: Arc<dyn Clock>, config: LeaseConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.config.duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn check(&self, plan_id: Uuid, target_week: u32) -> Result<LeaseCheck> {
        let lease = self.store.get_lease(plan_id, target_week).await?;
        Ok(LeaseCheck::evaluate(
            lease.as_ref(),
            self.clock.now(),
            self.config.duration,
        ))
    }

    /// Take the lease for (plan, week) unless a live or completed one exists.
    pub async fn acquire(
        &self,
        plan_id: Uuid,
        user_id: Uuid,
        target_week: u32,
    ) -> Result<AcquireOutcome> {
        let now = self.clock.now();
        let request = NewLease {
            id: Uuid::new_v4(),
            plan_id,
            user_id,
            target_week,
            started_at: now,
        };

        if let Some(lease) = self
            .store
            .acquire_lease(&request, self.stale_before(now))
            .await?
        {
            tracing::info!(
                plan_id = %plan_id,
                week = target_week,
                lease_id = %lease.id,
                attempt = lease.attempt,
                "lease acquired"
            );
            return Ok(AcquireOutcome::Acquired(lease));
        }

        let existing = self
            .store
            .get_lease(plan_id, target_week)
            .await?
            .with_context(|| {
                format!("lease for plan {plan_id} week {target_week} vanished during acquire")
            })?;

        if existing.status == LeaseStatus::Completed {
            Ok(AcquireOutcome::AlreadyGenerated {
                lease_id: existing.id,
            })
        } else {
            tracing::debug!(
                plan_id = %plan_id,
                week = target_week,
                lease_id = %existing.id,
                "lease held by another run"
            );
            Ok(AcquireOutcome::Held {
                lease_id: existing.id,
            })
        }
    }

    /// Move an owned lease to `completed` or `failed`.
    ///
    /// Repeating a release with the same status succeeds without change.
    pub async fn release(
        &self,
        lease: &GenerationLease,
        status: LeaseStatus,
        error: Option<&str>,
    ) -> Result<ReleaseOutcome, LeaseError> {
        if !status.is_terminal() {
            return Err(LeaseError::NotTerminal {
                lease_id: lease.id,
                status,
            });
        }

        let finished = self
            .store
            .finish_lease(lease.id, lease.attempt, status, error, self.clock.now())
            .await?;
        if finished {
            tracing::debug!(lease_id = %lease.id, attempt = lease.attempt, %status, "lease released");
            return Ok(ReleaseOutcome::Released);
        }

        let current = self
            .store
            .get_lease_by_id(lease.id)
            .await?
            .ok_or(LeaseError::NotFound { lease_id: lease.id })?;

        if current.attempt != lease.attempt {
            return Err(LeaseError::Superseded {
                lease_id: lease.id,
                attempt: lease.attempt,
                current_attempt: current.attempt,
            });
        }
        if current.status == status {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        Err(LeaseError::AlreadyFinished {
            lease_id: lease.id,
            status: current.status,
        })
    }

    /// Mark every abandoned `in_progress` lease as `failed`.
    ///
    /// Returns the number of leases this call transitioned.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let expired = self.store.list_expired_leases(self.stale_before(now)).await?;
        let message = format!(
            "lease expired after {} minutes",
            self.config.duration.num_minutes()
        );

        let mut swept = 0;
        for lease in expired {
            let finished = self
                .store
                .finish_lease(lease.id, lease.attempt, LeaseStatus::Failed, Some(&message), now)
                .await?;
            if finished {
                tracing::warn!(
                    plan_id = %lease.plan_id,
                    week = lease.target_week,
                    lease_id = %lease.id,
                    "swept expired lease"
                );
                swept += 1;
            }
        }
        Ok(swept)
    }

    pub async fn list(&self, plan_id: Uuid) -> Result<Vec<GenerationLease>> {
        self.store.list_leases(plan_id).await
    }
}
