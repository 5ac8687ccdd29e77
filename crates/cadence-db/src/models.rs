use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Phase of an event-anchored plan, in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventPhase {
    Base,
    Build,
    Peak,
    Taper,
}

/// Phase of a rolling (non-event) plan, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CyclePhase {
    Accumulation,
    Intensification,
    Realization,
    Deload,
}

/// Any periodization phase. Used wherever the plan model does not matter:
/// history snapshots, progression context, notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Base,
    Build,
    Peak,
    Taper,
    Accumulation,
    Intensification,
    Realization,
    Deload,
}

impl From<EventPhase> for Phase {
    fn from(phase: EventPhase) -> Self {
        match phase {
            EventPhase::Base => Self::Base,
            EventPhase::Build => Self::Build,
            EventPhase::Peak => Self::Peak,
            EventPhase::Taper => Self::Taper,
        }
    }
}

impl From<CyclePhase> for Phase {
    fn from(phase: CyclePhase) -> Self {
        match phase {
            CyclePhase::Accumulation => Self::Accumulation,
            CyclePhase::Intensification => Self::Intensification,
            CyclePhase::Realization => Self::Realization,
            CyclePhase::Deload => Self::Deload,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Base => "BASE",
            Self::Build => "BUILD",
            Self::Peak => "PEAK",
            Self::Taper => "TAPER",
            Self::Accumulation => "ACCUMULATION",
            Self::Intensification => "INTENSIFICATION",
            Self::Realization => "REALIZATION",
            Self::Deload => "DELOAD",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BASE" => Ok(Self::Base),
            "BUILD" => Ok(Self::Build),
            "PEAK" => Ok(Self::Peak),
            "TAPER" => Ok(Self::Taper),
            "ACCUMULATION" => Ok(Self::Accumulation),
            "INTENSIFICATION" => Ok(Self::Intensification),
            "REALIZATION" => Ok(Self::Realization),
            "DELOAD" => Ok(Self::Deload),
            other => Err(PhaseParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Phase`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid phase: {0:?}")]
pub struct PhaseParseError(pub String);

// ---------------------------------------------------------------------------
// Periodization
// ---------------------------------------------------------------------------

/// Week position and phase of an event-anchored plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    pub current_week: u32,
    pub total_weeks: u32,
    pub phase: EventPhase,
    /// Date of the target event, when the user gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<NaiveDate>,
}

/// Week position and phase of a rolling-cycle plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingSchedule {
    pub current_week: u32,
    pub total_weeks: u32,
    pub phase: CyclePhase,
}

/// Periodization record stored on a plan (JSONB, tagged by `model`).
///
/// Invariant: `1 <= current_week <= total_weeks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Periodization {
    EventAnchored(EventSchedule),
    RollingCycle(RollingSchedule),
}

impl Periodization {
    pub fn current_week(&self) -> u32 {
        match self {
            Self::EventAnchored(s) => s.current_week,
            Self::RollingCycle(s) => s.current_week,
        }
    }

    pub fn total_weeks(&self) -> u32 {
        match self {
            Self::EventAnchored(s) => s.total_weeks,
            Self::RollingCycle(s) => s.total_weeks,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::EventAnchored(s) => s.phase.into(),
            Self::RollingCycle(s) => s.phase.into(),
        }
    }

    /// `true` once the final week has been generated.
    pub fn is_complete(&self) -> bool {
        self.current_week() >= self.total_weeks()
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Status of a generation lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    InProgress,
    Completed,
    Failed,
}

impl LeaseStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for LeaseStatus {
    type Err = LeaseStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LeaseStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LeaseStatus`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid lease status: {0:?}")]
pub struct LeaseStatusParseError(pub String);

/// Kind of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewWeekReady,
    PhaseChange,
    DeloadReminder,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NewWeekReady => "new_week_ready",
            Self::PhaseChange => "phase_change",
            Self::DeloadReminder => "deload_reminder",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A multi-week training plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Content of the current week, as produced by the generator.
    pub weekly_plan: serde_json::Value,
    pub periodization: Option<Json<Periodization>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn periodization(&self) -> Option<&Periodization> {
        self.periodization.as_deref()
    }
}

/// Generator preferences for a user. Opaque to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserPreferences {
    pub user_id: Uuid,
    pub preferences: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Exclusivity record for generating one week of one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct GenerationLease {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub user_id: Uuid,
    pub target_week: i32,
    pub status: LeaseStatus,
    /// Fencing counter, bumped by every successful acquire.
    pub attempt: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Archived copy of a finished week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WeekSnapshot {
    pub plan_id: Uuid,
    pub week_number: i32,
    pub phase: Phase,
    pub weekly_plan: serde_json::Value,
    pub is_deload_week: bool,
    pub completed_at: DateTime<Utc>,
}

/// A user-facing event record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields of a notification before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodization_is_tagged_by_model() {
        let p = Periodization::EventAnchored(EventSchedule {
            current_week: 3,
            total_weeks: 12,
            phase: EventPhase::Base,
            event_date: None,
        });
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["model"], "event_anchored");
        assert_eq!(v["phase"], "BASE");
        assert_eq!(v["current_week"], 3);
        assert!(v.get("event_date").is_none());
    }

    #[test]
    fn rolling_cycle_parses_from_json() {
        let json = r#"{"model":"rolling_cycle","current_week":4,"total_weeks":16,"phase":"DELOAD"}"#;
        let p: Periodization = serde_json::from_str(json).unwrap();
        assert_eq!(p.current_week(), 4);
        assert_eq!(p.total_weeks(), 16);
        assert_eq!(p.phase(), Phase::Deload);
        assert!(!p.is_complete());
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let json = r#"{"model":"rolling_cycle","current_week":1,"total_weeks":4,"phase":"PEAK"}"#;
        assert!(serde_json::from_str::<Periodization>(json).is_err());
    }

    #[test]
    fn phase_display_and_parse_agree() {
        for phase in [
            Phase::Base,
            Phase::Build,
            Phase::Peak,
            Phase::Taper,
            Phase::Accumulation,
            Phase::Intensification,
            Phase::Realization,
            Phase::Deload,
        ] {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert!("base".parse::<Phase>().is_err());
    }

    #[test]
    fn lease_status_terminal() {
        assert!(!LeaseStatus::InProgress.is_terminal());
        assert!(LeaseStatus::Completed.is_terminal());
        assert!(LeaseStatus::Failed.is_terminal());
        assert_eq!("failed".parse::<LeaseStatus>().unwrap(), LeaseStatus::Failed);
    }
}
