use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::types::{KnowseeError, Result};

/// Cancellation token and task registry shared by everything the process
/// spawns.
///
/// Clones share the same token and tracker.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Awaits `future` unless cancellation wins first.
    pub async fn guard<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(KnowseeError::Cancelled),
            value = future => Ok(value),
        }
    }

    /// Spawns a task that [`shutdown`](Self::shutdown) will wait for.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Cancels, then waits up to `timeout` for spawned tasks to finish.
    ///
    /// Returns `false` when tasks were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("All tasks finished");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "Timed out waiting for tasks after {:?}", timeout
                );
                false
            }
        }
    }
}
