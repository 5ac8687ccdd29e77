//! Catch-up scanner: finds plans whose calendar week has moved past their
//! stored week and proposes generating exactly the next one.
//!
//! A plan several weeks behind advances by one week per scan.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use cadence_db::models::Plan;

use crate::clock::Clock;
use crate::store::PlanStore;

/// A (plan, week) that should be generated now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub plan_id: Uuid,
    pub user_id: Uuid,
    pub current_week: u32,
    pub target_week: u32,
    /// Week the calendar says the plan is in.
    pub calculated_week: u32,
}

/// Calendar week of a plan at `now`: whole weeks since creation, plus one.
///
/// Week 1 spans days `[0, 7)`. A creation time in the future counts as
/// week 1.
pub fn calculated_week(created_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let days = (now - created_at).num_days().max(0);
    u32::try_from(days / 7).map_or(u32::MAX, |weeks| weeks.saturating_add(1))
}

/// The next week to generate for `plan`, if any.
pub fn candidate_for(plan: &Plan, now: DateTime<Utc>) -> Option<Candidate> {
    let periodization = plan.periodization()?;
    let current_week = periodization.current_week();
    let total_weeks = periodization.total_weeks();
    let calculated = calculated_week(plan.created_at, now);

    if calculated <= current_week || current_week >= total_weeks {
        return None;
    }

    Some(Candidate {
        plan_id: plan.id,
        user_id: plan.user_id,
        current_week,
        target_week: current_week + 1,
        calculated_week: calculated,
    })
}

pub struct CatchUpScanner {
    store: Arc<dyn PlanStore>,
    clock: Arc<dyn Clock>,
}

impl CatchUpScanner {
    pub fn new(store: Arc<dyn PlanStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Read every periodized plan and return the ones that are behind.
    pub async fn scan(&self) -> Result<Vec<Candidate>> {
        let now = self.clock.now();
        let plans = self.store.list_periodized_plans().await?;
        let total = plans.len();

        let candidates: Vec<Candidate> = plans
            .iter()
            .filter_map(|plan| candidate_for(plan, now))
            .collect();

        for c in &candidates {
            if c.calculated_week > c.target_week {
                tracing::info!(
                    plan_id = %c.plan_id,
                    current_week = c.current_week,
                    calculated_week = c.calculated_week,
                    "plan is behind by more than one week, catching up one week"
                );
            }
        }
        tracing::info!(plans = total, candidates = candidates.len(), "catch-up scan complete");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use sqlx::types::Json;

    use cadence_db::models::{EventPhase, EventSchedule, Periodization};

    fn plan(created_at: DateTime<Utc>, current_week: u32, total_weeks: u32) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            weekly_plan: json!(null),
            periodization: Some(Json(Periodization::EventAnchored(EventSchedule {
                current_week,
                total_weeks,
                phase: EventPhase::Base,
                event_date: None,
            }))),
            created_at,
            updated_at: created_at,
        }
    }

    fn day0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn week_boundaries() {
        let c = day0();
        assert_eq!(calculated_week(c, c), 1);
        assert_eq!(calculated_week(c, c + Duration::days(6) + Duration::hours(23)), 1);
        assert_eq!(calculated_week(c, c + Duration::days(7)), 2);
        assert_eq!(calculated_week(c, c + Duration::days(8)), 2);
        assert_eq!(calculated_week(c, c + Duration::days(21)), 4);
        assert_eq!(calculated_week(c, c - Duration::days(3)), 1);
    }

    #[test]
    fn proposes_exactly_the_next_week() {
        let p = plan(day0(), 1, 12);
        let c = candidate_for(&p, day0() + Duration::days(8)).unwrap();
        assert_eq!(c.target_week, 2);
        assert_eq!(c.calculated_week, 2);
    }

    #[test]
    fn catches_up_one_week_at_a_time() {
        let p = plan(day0(), 2, 12);
        let c = candidate_for(&p, day0() + Duration::days(40)).unwrap();
        assert_eq!(c.calculated_week, 6);
        assert_eq!(c.target_week, 3);
    }

    #[test]
    fn skips_current_and_complete_plans() {
        assert!(candidate_for(&plan(day0(), 2, 12), day0() + Duration::days(8)).is_none());
        assert!(candidate_for(&plan(day0(), 12, 12), day0() + Duration::days(200)).is_none());

        let mut unperiodized = plan(day0(), 1, 12);
        unperiodized.periodization = None;
        assert!(candidate_for(&unperiodized, day0() + Duration::days(30)).is_none());
    }

    #[test]
    fn candidate_rule_holds_for_a_grid() {
        for total in 1..=10u32 {
            for current in 1..=total {
                for day in [0i64, 6, 7, 13, 14, 30, 90] {
                    let now = day0() + Duration::days(day);
                    let calculated = calculated_week(day0(), now);
                    let got = candidate_for(&plan(day0(), current, total), now);
                    let expected = calculated > current && current + 1 <= total;
                    assert_eq!(got.is_some(), expected, "total {total} current {current} day {day}");
                    if let Some(c) = got {
                        assert_eq!(c.target_week, current + 1);
                    }
                }
            }
        }
    }
}
