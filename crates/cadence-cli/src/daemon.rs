//! Wiring for the scheduler and the `cadence run` daemon.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use cadence_core::clock::SystemClock;
use cadence_core::generator::CommandGenerator;
use cadence_core::orchestrator::Orchestrator;
use cadence_core::scanner::CatchUpScanner;
use cadence_core::scheduler::Scheduler;
use cadence_core::store::PgStore;

use crate::config::CadenceConfig;

/// Build a scheduler over PostgreSQL and the configured generator program.
pub fn build_scheduler(config: &CadenceConfig, pool: PgPool) -> Result<Scheduler> {
    let command = config.require_generator()?;
    let generator = CommandGenerator::new(command.program.clone(), command.args.clone());
    tracing::info!(program = generator.program(), "using command generator");

    let orchestrator = Orchestrator::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(generator),
        Arc::new(SystemClock),
        config.phases,
        config.lease,
        config.orchestrator.clone(),
    );
    Ok(Scheduler::new(Arc::new(orchestrator), config.scheduler.clone()))
}

/// A scanner over PostgreSQL. Needs no generator.
pub fn build_scanner(pool: PgPool) -> CatchUpScanner {
    CatchUpScanner::new(Arc::new(PgStore::new(pool)), Arc::new(SystemClock))
}

/// Cancel `token` on Ctrl+C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
            Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C, shutting down"),
        }
        token.cancel();
    });
}

/// Execute `cadence run`: scan and sweep on schedule until Ctrl+C.
pub async fn run_daemon(scheduler: &Scheduler) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    scheduler.run(cancel).await?;
    tracing::info!("cadence run shut down");
    Ok(())
}
