//! `cadence status` command: show a plan's position, leases and history.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use cadence_db::models::{GenerationLease, Periodization};
use cadence_db::queries::history as history_db;
use cadence_db::queries::leases as lease_db;
use cadence_db::queries::plans as plan_db;

pub async fn run_status(pool: &PgPool, plan_id_str: &str) -> Result<()> {
    let plan_id =
        Uuid::parse_str(plan_id_str).with_context(|| format!("invalid plan ID: {plan_id_str}"))?;

    let plan = plan_db::get_plan(pool, plan_id)
        .await?
        .with_context(|| format!("plan {plan_id} not found"))?;

    println!("Plan: {} (user {})", plan.id, plan.user_id);
    println!("Created: {}", plan.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated: {}", plan.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    match plan.periodization() {
        Some(p) => println!("{}", position_line(p)),
        None => println!("Periodization: none (never scheduled)"),
    }
    println!();

    let leases = lease_db::list_leases_for_plan(pool, plan_id).await?;
    println!("Leases:");
    if leases.is_empty() {
        println!("  (none)");
    }
    for lease in &leases {
        println!("  {}", lease_line(lease));
    }
    println!();

    let history = history_db::list_history_for_plan(pool, plan_id).await?;
    println!("History:");
    if history.is_empty() {
        println!("  (none)");
    }
    for snapshot in &history {
        let deload = if snapshot.is_deload_week { " deload" } else { "" };
        println!(
            "  week {:>3}  {:<16}{}  archived {}",
            snapshot.week_number,
            snapshot.phase.to_string(),
            deload,
            snapshot.completed_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

fn position_line(p: &Periodization) -> String {
    let model = match p {
        Periodization::EventAnchored(s) => match s.event_date {
            Some(date) => format!("event-anchored, event on {date}"),
            None => "event-anchored".to_string(),
        },
        Periodization::RollingCycle(_) => "rolling cycle".to_string(),
    };
    let complete = if p.is_complete() { ", complete" } else { "" };
    format!(
        "Week {} of {} ({}, {model}{complete})",
        p.current_week(),
        p.total_weeks(),
        p.phase()
    )
}

fn lease_line(lease: &GenerationLease) -> String {
    let icon = match lease.status.to_string().as_str() {
        "in_progress" => "*",
        "completed" => "+",
        "failed" => "!",
        _ => " ",
    };
    let mut line = format!(
        "[{icon}] week {} (attempt {}, {}) started {}",
        lease.target_week,
        lease.attempt,
        lease.status,
        lease.started_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(error) = &lease.error {
        line.push_str(&format!(": {error}"));
    }
    line
}
