//! Lease properties exercised through the manager and the orchestrator.

mod common;

use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use uuid::Uuid;

use cadence_core::clock::{Clock, FixedClock};
use cadence_core::lease::{AcquireOutcome, LeaseCheck, LeaseConfig, LeaseManager};
use cadence_core::orchestrator::{GenerationOutcome, SkipReason};
use cadence_core::scanner::Candidate;
use cadence_core::scheduler::ScanTrigger;
use cadence_core::store::InMemoryStore;
use cadence_db::models::LeaseStatus;

use common::{Harness, ScriptedGenerator, day0};

fn manager() -> (Arc<LeaseManager>, Arc<InMemoryStore>, Arc<FixedClock>) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::new(day0()));
    let mgr = LeaseManager::new(store.clone(), clock.clone(), LeaseConfig::default());
    (Arc::new(mgr), store, clock)
}

#[tokio::test]
async fn concurrent_acquires_yield_one_owner() {
    let (mgr, store, _clock) = manager();
    let plan_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let attempts = (0..16).map(|_| {
        let mgr = mgr.clone();
        tokio::spawn(async move { mgr.acquire(plan_id, user_id, 2).await.unwrap() })
    });
    let outcomes: Vec<AcquireOutcome> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let owners: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            AcquireOutcome::Acquired(lease) => Some(lease.id),
            _ => None,
        })
        .collect();
    assert_eq!(owners.len(), 1);
    for outcome in &outcomes {
        if let AcquireOutcome::Held { lease_id } = outcome {
            assert_eq!(*lease_id, owners[0], "held outcome must name the existing lease");
        }
    }
    assert_eq!(store.lease_count().await, 1);
}

#[tokio::test]
async fn expired_lease_is_reported_and_can_be_retaken() {
    let (mgr, store, clock) = manager();
    let plan_id = Uuid::new_v4();
    let AcquireOutcome::Acquired(first) = mgr.acquire(plan_id, Uuid::new_v4(), 4).await.unwrap()
    else {
        panic!("first acquire must succeed");
    };

    clock.advance(Duration::minutes(29));
    assert!(mgr.check(plan_id, 4).await.unwrap().blocks());

    clock.advance(Duration::minutes(1));
    let check = mgr.check(plan_id, 4).await.unwrap();
    assert_eq!(
        check,
        LeaseCheck {
            locked: false,
            already_generated: false,
            expired: true
        }
    );

    let AcquireOutcome::Acquired(second) = mgr.acquire(plan_id, first.user_id, 4).await.unwrap()
    else {
        panic!("expired lease must be retaken");
    };
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt, first.attempt + 1);
    assert_eq!(second.started_at, clock.now());
    assert_eq!(store.lease_count().await, 1);
}

#[tokio::test]
async fn completed_lease_is_permanent() {
    let generator = Arc::new(ScriptedGenerator::new());
    let h = Harness::new(generator.clone());
    let plan = h.event_plan(1, 12).await;
    let leases = h.scheduler.orchestrator().leases();

    let AcquireOutcome::Acquired(lease) = leases.acquire(plan.id, plan.user_id, 2).await.unwrap()
    else {
        panic!("acquire must succeed");
    };
    leases
        .release(&lease, LeaseStatus::Completed, None)
        .await
        .unwrap();

    h.clock.advance(Duration::days(365));
    let check = leases.check(plan.id, 2).await.unwrap();
    assert!(check.locked && check.already_generated && !check.expired);
    assert_eq!(
        leases.acquire(plan.id, plan.user_id, 2).await.unwrap(),
        AcquireOutcome::AlreadyGenerated { lease_id: lease.id }
    );

    let candidate = Candidate {
        plan_id: plan.id,
        user_id: plan.user_id,
        current_week: 1,
        target_week: 2,
        calculated_week: 9,
    };
    let outcome = h.scheduler.orchestrator().run_candidate(&candidate).await;
    assert!(matches!(
        outcome,
        GenerationOutcome::Skipped(SkipReason::AlreadyGenerated)
    ));
    assert_eq!(generator.calls(), 0);
    assert_eq!(h.current_week(plan.id).await, 1);
}

#[tokio::test]
async fn sweep_frees_an_abandoned_week_for_the_next_scan() {
    let generator = Arc::new(ScriptedGenerator::new());
    let h = Harness::new(generator.clone());
    let plan = h.event_plan(2, 12).await;
    h.at_day(15);

    // A run that died after acquiring.
    let leases = h.scheduler.orchestrator().leases();
    assert!(matches!(
        leases.acquire(plan.id, plan.user_id, 3).await.unwrap(),
        AcquireOutcome::Acquired(_)
    ));

    h.clock.advance(Duration::minutes(45));
    assert_eq!(h.scheduler.sweep_expired().await.unwrap(), 1);
    let swept = h.lease(plan.id, 3).await;
    assert_eq!(swept.status, LeaseStatus::Failed);

    let summary = h
        .scheduler
        .scan_and_dispatch(ScanTrigger::Daily)
        .await
        .unwrap()
        .dispatch
        .wait()
        .await;
    assert_eq!(summary.generated, 1);
    assert_eq!(h.lease(plan.id, 3).await.attempt, 2);
}
