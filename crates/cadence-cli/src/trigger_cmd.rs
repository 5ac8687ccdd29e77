//! `cadence trigger`: generate a plan's next week now, regardless of the
//! calendar.

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use cadence_core::orchestrator::GenerationOutcome;
use cadence_core::scheduler::Scheduler;

pub async fn run_trigger(scheduler: &Scheduler, plan_id_str: &str) -> Result<()> {
    let plan_id =
        Uuid::parse_str(plan_id_str).with_context(|| format!("invalid plan ID: {plan_id_str}"))?;

    let triggered = scheduler.trigger_now(plan_id).await;
    let response = triggered.response;
    let Some(handle) = triggered.handle else {
        bail!(
            "not queued: {}",
            response.reason.as_deref().unwrap_or("unknown reason")
        );
    };
    if let Some(week) = response.target_week {
        println!("Generating week {week} of plan {plan_id}...");
    }

    match handle.await.context("generation task panicked")? {
        GenerationOutcome::Generated(week) => {
            println!("Week {} generated ({}).", week.week, week.phase);
            if week.phase_changed {
                println!("  phase changed to {}", week.phase);
            }
            if week.is_deload {
                println!("  deload week");
            }
            Ok(())
        }
        GenerationOutcome::Skipped(reason) => {
            println!("Skipped: {reason:?}");
            Ok(())
        }
        GenerationOutcome::Failed(err) => Err(err).context("generation failed"),
    }
}
