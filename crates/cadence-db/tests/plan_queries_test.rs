//! Integration tests for plan, history and notification queries.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use cadence_db::models::{
    CyclePhase, NewNotification, NotificationKind, Periodization, Phase, RollingSchedule,
    WeekSnapshot,
};
use cadence_db::queries::{history, notifications, plans, preferences};
use cadence_test_utils::TestDb;

fn rolling(week: u32) -> Periodization {
    Periodization::RollingCycle(RollingSchedule {
        current_week: week,
        total_weeks: 8,
        phase: CyclePhase::Accumulation,
    })
}

#[tokio::test]
async fn patch_plan_week_is_optimistic() {
    let db = TestDb::create().await;
    let now = Utc::now();
    let plan = plans::insert_plan(&db.pool, Uuid::new_v4(), &json!({"w": 1}), Some(&rolling(1)), now)
        .await
        .unwrap();
    plans::insert_plan(&db.pool, Uuid::new_v4(), &json!(null), None, now)
        .await
        .unwrap();

    let periodized = plans::list_periodized_plans(&db.pool).await.unwrap();
    assert_eq!(periodized.len(), 1);
    assert_eq!(periodized[0].periodization().unwrap().current_week(), 1);

    let ok = plans::patch_plan_week(&db.pool, plan.id, 1, &json!({"w": 2}), &rolling(2), now)
        .await
        .unwrap();
    assert!(ok);

    let lost = plans::patch_plan_week(&db.pool, plan.id, 1, &json!({"w": 9}), &rolling(2), now)
        .await
        .unwrap();
    assert!(!lost, "second writer with a stale week must lose");

    let stored = plans::get_plan(&db.pool, plan.id).await.unwrap().unwrap();
    assert_eq!(stored.weekly_plan, json!({"w": 2}));
    assert_eq!(stored.periodization().unwrap().current_week(), 2);

    db.drop().await;
}

#[tokio::test]
async fn history_insert_is_write_once() {
    let db = TestDb::create().await;
    let now = Utc::now();
    let plan = plans::insert_plan(&db.pool, Uuid::new_v4(), &json!({}), Some(&rolling(1)), now)
        .await
        .unwrap();

    let snapshot = WeekSnapshot {
        plan_id: plan.id,
        week_number: 1,
        phase: Phase::Accumulation,
        weekly_plan: json!({"w": 1}),
        is_deload_week: false,
        completed_at: now,
    };
    assert!(history::insert_snapshot(&db.pool, &snapshot).await.unwrap());

    let overwrite = WeekSnapshot {
        weekly_plan: json!({"w": "other"}),
        ..snapshot.clone()
    };
    assert!(!history::insert_snapshot(&db.pool, &overwrite).await.unwrap());

    let stored = history::get_snapshot(&db.pool, plan.id, 1).await.unwrap().unwrap();
    assert_eq!(stored.weekly_plan, json!({"w": 1}));
    assert_eq!(history::list_history_for_plan(&db.pool, plan.id).await.unwrap().len(), 1);

    db.drop().await;
}

#[tokio::test]
async fn preferences_and_notifications_round_trip() {
    let db = TestDb::create().await;
    let user_id = Uuid::new_v4();
    let now = Utc::now();

    preferences::upsert_preferences(&db.pool, user_id, &json!({"days": 3}), now)
        .await
        .unwrap();
    preferences::upsert_preferences(&db.pool, user_id, &json!({"days": 4}), now)
        .await
        .unwrap();
    let prefs = preferences::get_preferences(&db.pool, user_id).await.unwrap().unwrap();
    assert_eq!(prefs.preferences, json!({"days": 4}));

    let stored = notifications::insert_notification(
        &db.pool,
        &NewNotification {
            user_id,
            kind: NotificationKind::PhaseChange,
            title: "Entering BUILD phase".into(),
            body: "Week 5 is ready".into(),
            payload: json!({"week": 5}),
            created_at: now,
        },
    )
    .await
    .unwrap();
    assert_eq!(stored.kind, NotificationKind::PhaseChange);
    assert!(!stored.read);

    let listed = notifications::list_notifications_for_user(&db.pool, user_id).await.unwrap();
    assert_eq!(listed.len(), 1);

    db.drop().await;
}
