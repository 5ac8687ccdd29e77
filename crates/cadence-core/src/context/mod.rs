//! Progression context handed to the week generator.
//!
//! Only the shape is fixed here. What the generator does with it (wording,
//! prompts, exercise selection) is its own business.

use serde::{Deserialize, Serialize};

use cadence_db::models::{Phase, WeekSnapshot};

/// At or below this many weeks to the event, the context is marked urgent.
pub const URGENT_WEEKS: u32 = 2;

/// The week being superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousWeek {
    pub week_number: u32,
    pub phase: Phase,
    pub weekly_plan: serde_json::Value,
}

impl From<&WeekSnapshot> for PreviousWeek {
    fn from(snapshot: &WeekSnapshot) -> Self {
        Self {
            week_number: u32::try_from(snapshot.week_number).unwrap_or(0),
            phase: snapshot.phase,
            weekly_plan: snapshot.weekly_plan.clone(),
        }
    }
}

/// Kind of load guidance the generator should follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guidance {
    Progression,
    VolumeReduction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionContext {
    pub previous: Option<PreviousWeek>,
    pub new_phase: Phase,
    pub phase_changed: bool,
    pub is_deload: bool,
    pub target_week: u32,
    pub total_weeks: u32,
    pub weeks_until_event: Option<u32>,
    pub event_urgent: bool,
    pub guidance: Guidance,
}

/// Assemble a context. Never touches storage.
pub fn build(
    previous: Option<&PreviousWeek>,
    new_phase: Phase,
    phase_changed: bool,
    is_deload: bool,
    target_week: u32,
    total_weeks: u32,
    weeks_until_event: Option<u32>,
) -> ProgressionContext {
    let guidance = if is_deload {
        Guidance::VolumeReduction
    } else {
        Guidance::Progression
    };

    ProgressionContext {
        previous: previous.cloned(),
        new_phase,
        phase_changed,
        is_deload,
        target_week,
        total_weeks,
        weeks_until_event,
        event_urgent: weeks_until_event.is_some_and(|w| w <= URGENT_WEEKS),
        guidance,
    }
}
