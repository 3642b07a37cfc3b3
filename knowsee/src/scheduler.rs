use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use crate::context::SyncContext;
use crate::sync::{SyncOrchestrator, SyncSummary};
use crate::types::KnowseeError;

/// Periodic driver of [`SyncOrchestrator::sync_all`].
///
/// Rounds never overlap: the interval is measured from the end of one round
/// to the start of the next.
pub struct Scheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Runs until `ctx` is cancelled and returns the number of completed rounds.
    #[instrument(skip(self, ctx), fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(&self, ctx: SyncContext) -> usize {
        info!("Scheduler started");
        let mut rounds = 0;

        loop {
            match self.orchestrator.sync_all(&ctx).await {
                Ok(SyncSummary { cancelled, .. }) if cancelled > 0 && ctx.is_cancelled() => break,
                Ok(_) => rounds += 1,
                Err(KnowseeError::Cancelled) => break,
                Err(e) => error!("Sync round failed: {}", e),
            }

            tokio::select! {
                _ = ctx.token().cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(rounds, "Scheduler stopped");
        rounds
    }
}
