//! `cadence scan` and `cadence sweep`: one-shot versions of the daemon's
//! scheduled work.

use anyhow::Result;

use cadence_core::orchestrator::DispatchSummary;
use cadence_core::scanner::{Candidate, CatchUpScanner};
use cadence_core::scheduler::{ScanTrigger, Scheduler};

/// Run `cadence scan --dry-run`: list the plans that are behind.
pub async fn run_dry_scan(scanner: &CatchUpScanner) -> Result<()> {
    let candidates = scanner.scan().await?;
    print!("{}", candidate_table(&candidates));
    Ok(())
}

/// Run the scan command: generate one week for every plan that is behind
/// and wait for the batch to finish.
pub async fn run_scan(scheduler: &Scheduler) -> Result<()> {
    let report = scheduler.scan_and_dispatch(ScanTrigger::Manual).await?;
    print!("{}", candidate_table(&report.candidates));
    if report.candidates.is_empty() {
        return Ok(());
    }
    println!();

    let summary = report.dispatch.wait().await;
    println!("{}", summary_line(&summary));
    if summary.failed > 0 {
        anyhow::bail!("{} generation(s) failed; see log output", summary.failed);
    }
    Ok(())
}

/// Run the sweep command.
pub async fn run_sweep(scheduler: &Scheduler) -> Result<()> {
    let swept = scheduler.sweep_expired().await?;
    println!("Expired leases marked failed: {swept}");
    Ok(())
}

fn candidate_table(candidates: &[Candidate]) -> String {
    if candidates.is_empty() {
        return "No plans are behind schedule.\n".to_string();
    }
    let mut out = format!(
        "{:<38} {:>8} {:>8} {:>10}\n",
        "PLAN", "CURRENT", "TARGET", "CALENDAR"
    );
    out.push_str(&"-".repeat(67));
    out.push('\n');
    for c in candidates {
        out.push_str(&format!(
            "{:<38} {:>8} {:>8} {:>10}\n",
            c.plan_id, c.current_week, c.target_week, c.calculated_week
        ));
    }
    out
}

fn summary_line(summary: &DispatchSummary) -> String {
    format!(
        "Dispatched {}: {} generated, {} skipped, {} failed",
        summary.dispatched, summary.generated, summary.skipped, summary.failed
    )
}
