//! Integration tests for the generation lease queries.
//!
//! Each test runs against its own migrated database; see
//! `cadence_test_utils` for how the server is provided.

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use cadence_db::models::{
    EventPhase, EventSchedule, LeaseStatus, Periodization,
};
use cadence_db::queries::{leases, plans};
use cadence_test_utils::TestDb;

async fn seed_plan(db: &TestDb) -> (Uuid, Uuid) {
    let user_id = Uuid::new_v4();
    let periodization = Periodization::EventAnchored(EventSchedule {
        current_week: 1,
        total_weeks: 12,
        phase: EventPhase::Base,
        event_date: None,
    });
    let plan = plans::insert_plan(
        &db.pool,
        user_id,
        &json!({"week": 1}),
        Some(&periodization),
        Utc::now(),
    )
    .await
    .expect("insert plan");
    (plan.id, user_id)
}

#[tokio::test]
async fn acquire_is_exclusive_until_stale() {
    let db = TestDb::create().await;
    let (plan_id, user_id) = seed_plan(&db).await;
    let t0 = Utc.with_ymd_and_hms(2025, 3, 3, 2, 0, 0).unwrap();
    let ttl = Duration::minutes(30);

    let first = leases::acquire_lease(&db.pool, Uuid::new_v4(), plan_id, user_id, 2, t0, t0 - ttl)
        .await
        .unwrap()
        .expect("first acquire wins");
    assert_eq!(first.status, LeaseStatus::InProgress);
    assert_eq!(first.attempt, 1);

    let t1 = t0 + Duration::minutes(5);
    let second = leases::acquire_lease(&db.pool, Uuid::new_v4(), plan_id, user_id, 2, t1, t1 - ttl)
        .await
        .unwrap();
    assert!(second.is_none(), "fresh in-progress lease must block");

    let t2 = t0 + Duration::minutes(31);
    let third = leases::acquire_lease(&db.pool, Uuid::new_v4(), plan_id, user_id, 2, t2, t2 - ttl)
        .await
        .unwrap()
        .expect("stale lease is taken over");
    assert_eq!(third.id, first.id);
    assert_eq!(third.attempt, 2);
    assert_eq!(third.started_at, t2);

    db.drop().await;
}

#[tokio::test]
async fn finish_is_fenced_by_attempt() {
    let db = TestDb::create().await;
    let (plan_id, user_id) = seed_plan(&db).await;
    let now = Utc::now();
    let stale_before = now - Duration::minutes(30);

    let lease = leases::acquire_lease(&db.pool, Uuid::new_v4(), plan_id, user_id, 2, now, stale_before)
        .await
        .unwrap()
        .unwrap();

    let stale = leases::finish_lease(&db.pool, lease.id, lease.attempt + 1, LeaseStatus::Completed, None, now)
        .await
        .unwrap();
    assert!(!stale);

    let done = leases::finish_lease(&db.pool, lease.id, lease.attempt, LeaseStatus::Completed, None, now)
        .await
        .unwrap();
    assert!(done);

    let again = leases::finish_lease(&db.pool, lease.id, lease.attempt, LeaseStatus::Failed, Some("late"), now)
        .await
        .unwrap();
    assert!(!again, "terminal lease cannot change status");

    let stored = leases::get_lease(&db.pool, plan_id, 2).await.unwrap().unwrap();
    assert_eq!(stored.status, LeaseStatus::Completed);
    assert!(stored.completed_at.is_some());

    let blocked = leases::acquire_lease(&db.pool, Uuid::new_v4(), plan_id, user_id, 2, now, now)
        .await
        .unwrap();
    assert!(blocked.is_none(), "completed lease is never re-acquired");

    db.drop().await;
}

#[tokio::test]
async fn failed_lease_is_retried_and_expired_leases_listed() {
    let db = TestDb::create().await;
    let (plan_id, user_id) = seed_plan(&db).await;
    let t0 = Utc::now() - Duration::hours(2);

    let lease = leases::acquire_lease(&db.pool, Uuid::new_v4(), plan_id, user_id, 3, t0, t0)
        .await
        .unwrap()
        .unwrap();
    leases::finish_lease(&db.pool, lease.id, 1, LeaseStatus::Failed, Some("boom"), t0)
        .await
        .unwrap();

    let retried = leases::acquire_lease(&db.pool, Uuid::new_v4(), plan_id, user_id, 3, t0, t0)
        .await
        .unwrap()
        .expect("failed lease is retried");
    assert_eq!(retried.attempt, 2);
    assert!(retried.error.is_none());

    let expired = leases::list_expired_leases(&db.pool, Utc::now() - Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, lease.id);

    let all = leases::list_leases_for_plan(&db.pool, plan_id).await.unwrap();
    assert_eq!(all.len(), 1);

    db.drop().await;
}
