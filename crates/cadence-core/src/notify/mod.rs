//! User-facing notifications for newly generated weeks.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use cadence_db::models::{NewNotification, Notification, NotificationKind, Phase};

use crate::clock::Clock;
use crate::store::PlanStore;

/// A week that was just generated and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekReady {
    pub plan_id: Uuid,
    pub user_id: Uuid,
    pub week: u32,
    pub phase: Phase,
    pub phase_changed: bool,
    pub is_deload: bool,
}

impl WeekReady {
    /// Phase change wins over deload, deload over a plain new week.
    pub fn kind(&self) -> NotificationKind {
        if self.phase_changed {
            NotificationKind::PhaseChange
        } else if self.is_deload {
            NotificationKind::DeloadReminder
        } else {
            NotificationKind::NewWeekReady
        }
    }
}

pub fn compose(event: &WeekReady, at: DateTime<Utc>) -> NewNotification {
    let week = event.week;
    let phase = event.phase;
    let (title, body) = match event.kind() {
        NotificationKind::PhaseChange => (
            format!("Entering {phase} phase"),
            format!("Week {week} is ready and starts your {phase} phase."),
        ),
        NotificationKind::DeloadReminder => (
            "Deload week ahead".to_owned(),
            format!("Week {week} is a deload week. Volume is reduced to help you recover."),
        ),
        NotificationKind::NewWeekReady => (
            format!("Week {week} is ready"),
            format!("Your plan for week {week} has been generated."),
        ),
    };

    NewNotification {
        user_id: event.user_id,
        kind: event.kind(),
        title,
        body,
        payload: json!({
            "plan_id": event.plan_id,
            "week": week,
            "phase": phase,
            "is_deload": event.is_deload,
        }),
        created_at: at,
    }
}

pub struct Notifier {
    store: Arc<dyn PlanStore>,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(store: Arc<dyn PlanStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn week_ready(&self, event: &WeekReady) -> Result<Notification> {
        let notification = compose(event, self.clock.now());
        let stored = self.store.insert_notification(&notification).await?;
        tracing::info!(
            plan_id = %event.plan_id,
            week = event.week,
            kind = %stored.kind,
            "notification created"
        );
        Ok(stored)
    }
}
