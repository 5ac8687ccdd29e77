//! Periodization state machine.
//!
//! Pure computation: the phase of a week, whether it is a deload week, and
//! the periodization a plan moves to when its next week is generated.
//! Event-anchored plans run BASE, BUILD, PEAK, TAPER over a fixed
//! allocation of their weeks. Rolling plans repeat a four-week cycle.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cadence_db::models::{
    CyclePhase, EventPhase, EventSchedule, Periodization, Phase, RollingSchedule,
};

/// Proportions and cadence used to lay out phases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Share of an event-anchored plan spent in TAPER.
    pub taper_ratio: f64,
    /// Share of an event-anchored plan spent in PEAK.
    pub peak_ratio: f64,
    /// BASE and BUILD weeks of an event-anchored plan whose number is a
    /// multiple of this are deload weeks. Zero disables them. Rolling plans
    /// deload in the DELOAD week of their cycle.
    pub deload_every: u32,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            taper_ratio: 0.10,
            peak_ratio: 0.15,
            deload_every: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("plan is complete: week {current_week} of {total_weeks}")]
    PlanComplete { current_week: u32, total_weeks: u32 },

    #[error("invalid periodization position: week {current_week} of {total_weeks}")]
    InvalidPosition { current_week: u32, total_weeks: u32 },
}

/// Plan type, without its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanModel {
    EventAnchored,
    RollingCycle,
}

impl PlanModel {
    pub fn of(periodization: &Periodization) -> Self {
        match periodization {
            Periodization::EventAnchored(_) => Self::EventAnchored,
            Periodization::RollingCycle(_) => Self::RollingCycle,
        }
    }
}

/// Number of weeks each event phase occupies, in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseAllocation {
    pub base: u32,
    pub build: u32,
    pub peak: u32,
    pub taper: u32,
}

impl PhaseAllocation {
    pub fn for_total(total_weeks: u32, config: &PhaseConfig) -> Self {
        if total_weeks == 0 {
            return Self {
                base: 0,
                build: 0,
                peak: 0,
                taper: 0,
            };
        }
        let total = f64::from(total_weeks);
        let taper = ((total * config.taper_ratio).ceil() as u32).clamp(1, total_weeks);
        let peak = ((total * config.peak_ratio).ceil() as u32).min(total_weeks - taper);
        let remainder = total_weeks - taper - peak;
        let build = remainder / 2;
        let base = remainder - build;
        Self {
            base,
            build,
            peak,
            taper,
        }
    }

    /// Phase of a 1-based week. Weeks past the end stay in TAPER.
    pub fn phase_of(&self, week: u32) -> EventPhase {
        let build_start = self.base;
        let peak_start = build_start + self.build;
        let taper_start = peak_start + self.peak;
        if week <= build_start {
            EventPhase::Base
        } else if week <= peak_start {
            EventPhase::Build
        } else if week <= taper_start {
            EventPhase::Peak
        } else {
            EventPhase::Taper
        }
    }
}

/// Result of advancing a plan by one week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advanced {
    pub periodization: Periodization,
    pub phase_changed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PhaseMachine {
    config: PhaseConfig,
}

impl PhaseMachine {
    pub fn new(config: PhaseConfig) -> Self {
        Self { config }
    }

    /// Phase of `week` in a rolling cycle.
    pub fn cycle_phase(week: u32) -> CyclePhase {
        match week.saturating_sub(1) % 4 {
            0 => CyclePhase::Accumulation,
            1 => CyclePhase::Intensification,
            2 => CyclePhase::Realization,
            _ => CyclePhase::Deload,
        }
    }

    pub fn phase_for_week(&self, model: PlanModel, week: u32, total_weeks: u32) -> Phase {
        match model {
            PlanModel::EventAnchored => PhaseAllocation::for_total(total_weeks, &self.config)
                .phase_of(week)
                .into(),
            PlanModel::RollingCycle => Self::cycle_phase(week).into(),
        }
    }

    pub fn is_deload_week(&self, model: PlanModel, week: u32, total_weeks: u32) -> bool {
        match self.phase_for_week(model, week, total_weeks) {
            Phase::Taper | Phase::Deload => true,
            Phase::Base | Phase::Build => {
                self.config.deload_every > 0 && week % self.config.deload_every == 0
            }
            Phase::Peak | Phase::Accumulation | Phase::Intensification | Phase::Realization => {
                false
            }
        }
    }

    /// Move `periodization` forward exactly one week and recompute its phase.
    pub fn advance(&self, periodization: &Periodization) -> Result<Advanced, PhaseError> {
        let current_week = periodization.current_week();
        let total_weeks = periodization.total_weeks();
        if current_week == 0 || current_week > total_weeks {
            return Err(PhaseError::InvalidPosition {
                current_week,
                total_weeks,
            });
        }
        if current_week == total_weeks {
            return Err(PhaseError::PlanComplete {
                current_week,
                total_weeks,
            });
        }

        let next_week = current_week + 1;
        let next = match periodization {
            Periodization::EventAnchored(s) => Periodization::EventAnchored(EventSchedule {
                current_week: next_week,
                total_weeks,
                phase: PhaseAllocation::for_total(total_weeks, &self.config).phase_of(next_week),
                event_date: s.event_date,
            }),
            Periodization::RollingCycle(_) => Periodization::RollingCycle(RollingSchedule {
                current_week: next_week,
                total_weeks,
                phase: Self::cycle_phase(next_week),
            }),
        };

        let phase_changed = next.phase() != periodization.phase();
        Ok(Advanced {
            periodization: next,
            phase_changed,
        })
    }

    /// Weeks left before the event, seen from `today` for `target_week`.
    ///
    /// With an event date this is the number of whole weeks until it,
    /// rounded up and never negative. Without one it is the number of
    /// weeks left in the plan. Rolling plans have no event.
    pub fn weeks_until_event(
        &self,
        periodization: &Periodization,
        target_week: u32,
        today: NaiveDate,
    ) -> Option<u32> {
        match periodization {
            Periodization::EventAnchored(s) => match s.event_date {
                Some(date) => {
                    let days = (date - today).num_days();
                    if days <= 0 {
                        Some(0)
                    } else {
                        Some(u32::try_from((days + 6) / 7).unwrap_or(u32::MAX))
                    }
                }
                None => Some(s.total_weeks.saturating_sub(target_week)),
            },
            Periodization::RollingCycle(_) => None,
        }
    }
}
