//! Scheduler: periodic scans, the lease sweep, and the one-shot entry
//! points the CLI and HTTP surfaces call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::orchestrator::{DispatchHandle, Orchestrator, Triggered};
use crate::scanner::{Candidate, CatchUpScanner};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub daily_scan: Duration,
    pub weekly_scan: Duration,
    pub sweep_interval: Duration,
    /// How long `run` waits for in-flight generations after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_scan: Duration::from_secs(24 * 60 * 60),
            weekly_scan: Duration::from_secs(7 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// What started a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTrigger {
    Daily,
    Weekly,
    Manual,
}

impl fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A scan that has been dispatched but not necessarily finished.
pub struct ScanReport {
    pub trigger: ScanTrigger,
    pub candidates: Vec<Candidate>,
    pub dispatch: DispatchHandle,
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    scanner: CatchUpScanner,
    config: SchedulerConfig,
}

fn at_least_one_second(d: Duration) -> Duration {
    d.max(Duration::from_secs(1))
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, config: SchedulerConfig) -> Self {
        let scanner = CatchUpScanner::new(
            orchestrator.store().clone(),
            orchestrator.clock().clone(),
        );
        Self {
            orchestrator,
            scanner,
            config,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Scan every plan and dispatch one generation per candidate. Returns
    /// as soon as the work is dispatched.
    pub async fn scan_and_dispatch(&self, trigger: ScanTrigger) -> Result<ScanReport> {
        tracing::info!(%trigger, "scan started");
        let candidates = self.scanner.scan().await?;
        let dispatch = self.orchestrator.dispatch(candidates.clone());
        Ok(ScanReport {
            trigger,
            candidates,
            dispatch,
        })
    }

    pub async fn trigger_now(&self, plan_id: Uuid) -> Triggered {
        self.orchestrator.trigger_now(plan_id).await
    }

    /// Mark abandoned leases as failed so their weeks can be retried.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let swept = self.orchestrator.leases().sweep_expired().await?;
        tracing::info!(swept, "lease sweep complete");
        Ok(swept)
    }

    /// Run scans and sweeps on their intervals until `cancel` fires, then
    /// stop accepting work and wait for in-flight generations.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let weekly_period = at_least_one_second(self.config.weekly_scan);

        let mut daily = tokio::time::interval(at_least_one_second(self.config.daily_scan));
        // The daily scan already runs at startup.
        let mut weekly = tokio::time::interval_at(Instant::now() + weekly_period, weekly_period);
        let mut sweep = tokio::time::interval(at_least_one_second(self.config.sweep_interval));
        for interval in [&mut daily, &mut weekly, &mut sweep] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        let mut batches: JoinSet<()> = JoinSet::new();
        tracing::info!(
            daily_secs = self.config.daily_scan.as_secs(),
            weekly_secs = self.config.weekly_scan.as_secs(),
            sweep_secs = self.config.sweep_interval.as_secs(),
            "scheduler running"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = daily.tick() => self.scheduled_scan(ScanTrigger::Daily, &mut batches).await,
                _ = weekly.tick() => self.scheduled_scan(ScanTrigger::Weekly, &mut batches).await,
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep_expired().await {
                        tracing::error!(error = %e, "lease sweep failed");
                    }
                }
                Some(_) = batches.join_next(), if !batches.is_empty() => {}
            }
        }

        tracing::info!(batches = batches.len(), "scheduler stopping, draining in-flight work");
        self.orchestrator.close();
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while batches.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = batches.len(),
                "shutdown grace expired, aborting in-flight generations"
            );
            batches.shutdown().await;
        }
        Ok(())
    }

    async fn scheduled_scan(&self, trigger: ScanTrigger, batches: &mut JoinSet<()>) {
        match self.scan_and_dispatch(trigger).await {
            Ok(report) => {
                if report.candidates.is_empty() {
                    return;
                }
                batches.spawn(async move {
                    let summary = report.dispatch.wait().await;
                    tracing::info!(
                        trigger = %report.trigger,
                        dispatched = summary.dispatched,
                        generated = summary.generated,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        "batch finished"
                    );
                });
            }
            Err(e) => tracing::error!(%trigger, error = %e, "scan failed"),
        }
    }
}
