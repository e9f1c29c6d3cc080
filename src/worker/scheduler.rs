//! Dispatcher (agent manager): turns queue depth into bounded concurrency.
//!
//! Each cycle claims up to `min(claim_batch, free permits)` pending items in
//! one atomic store call and spawns one task per item. A semaphore caps how
//! many items run at once; claimed items therefore never sit waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::DatabaseError;
use crate::pipeline::ItemProcessor;
use crate::store::Database;
use crate::worker::state::{FailureKind, PipelineStep, StepStatus};

/// Result of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub claimed: usize,
    /// `ceil(claimed / group_size)`. Reported only.
    pub required_agents: usize,
}

/// Number of agents warranted for `claimed` items.
pub fn required_agents(claimed: usize, group_size: usize) -> usize {
    claimed.div_ceil(group_size.max(1))
}

/// Polls the queue and launches item processors.
pub struct Dispatcher {
    db: Arc<dyn Database>,
    processor: Arc<ItemProcessor>,
    config: DispatchConfig,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        processor: Arc<ItemProcessor>,
        config: DispatchConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            db,
            processor,
            config,
            permits,
        }
    }

    /// Items currently running.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent.max(1) - self.permits.available_permits()
    }

    /// Claim one batch and spawn a task per item into `tasks`.
    pub async fn dispatch_once(
        &self,
        tasks: &mut JoinSet<()>,
    ) -> Result<DispatchOutcome, DatabaseError> {
        let capacity = self.config.claim_batch.min(self.permits.available_permits());
        if capacity == 0 {
            return Ok(DispatchOutcome {
                claimed: 0,
                required_agents: 0,
            });
        }

        let items = self.db.claim_batch(capacity).await?;
        let outcome = DispatchOutcome {
            claimed: items.len(),
            required_agents: required_agents(items.len(), self.config.group_size),
        };

        for item in items {
            // Only this dispatcher takes permits, and at most `capacity` were
            // free, so this never comes back empty.
            let permit = Arc::clone(&self.permits).try_acquire_owned().ok();
            let db = Arc::clone(&self.db);
            let processor = Arc::clone(&self.processor);

            tasks.spawn(async move {
                let _permit = permit;
                let item_id = item.id;
                // Inner task so a panic in the pipeline surfaces as a JoinError
                // here instead of tearing down the permit holder.
                let handle = tokio::spawn(async move { processor.process(&item).await });
                if let Err(e) = handle.await {
                    recover_panicked(db.as_ref(), item_id, e.to_string()).await;
                }
            });
        }

        Ok(outcome)
    }

    /// Run until `shutdown` is set, then wait for in-flight items.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            batch = self.config.claim_batch,
            max_concurrent = self.config.max_concurrent,
            "Dispatcher started"
        );

        let mut tasks = JoinSet::new();

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Dispatcher shutting down");
                break;
            }

            while let Some(result) = tasks.try_join_next() {
                reap(result);
            }

            match self.dispatch_once(&mut tasks).await {
                Ok(outcome) if outcome.claimed > 0 => {
                    info!(
                        claimed = outcome.claimed,
                        required_agents = outcome.required_agents,
                        in_flight = tasks.len(),
                        "Dispatched batch"
                    );
                }
                Ok(_) => {
                    tokio::select! {
                        Some(result) = tasks.join_next(), if !tasks.is_empty() => reap(result),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Dispatch cycle failed; backing off");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        if !tasks.is_empty() {
            info!(count = tasks.len(), "Waiting for in-flight items");
            while let Some(result) = tasks.join_next().await {
                reap(result);
            }
        }
    }
}

fn reap(result: Result<(), JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "Dispatcher task ended abnormally");
    }
}

/// Record a panicked item as a transient failure so the retry agent sees it.
async fn recover_panicked(db: &dyn Database, item_id: i64, err: String) {
    error!(item_id, error = %err, "Item task panicked");
    if let Err(e) = db
        .log_step(
            item_id,
            PipelineStep::Error,
            StepStatus::Error,
            &format!("task panicked: {err}"),
        )
        .await
    {
        warn!(item_id, error = %e, "Failed to record panic step");
    }
    match db.mark_failed(item_id, FailureKind::Transient).await {
        Ok(_) => debug!(item_id, "Panicked item marked failed"),
        Err(e) => error!(item_id, error = %e, "Failed to mark panicked item"),
    }
}

/// Spawn the dispatcher loop.
///
/// Returns a `JoinHandle` and shutdown flag. After setting the flag, awaiting
/// the handle waits for in-flight items to finish.
pub fn spawn_dispatcher(dispatcher: Arc<Dispatcher>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let handle = tokio::spawn(async move {
        dispatcher.run(shutdown).await;
    });
    (handle, shutdown_flag)
}
