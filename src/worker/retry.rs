//! Retry agent: revives transient failures below the attempt cap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::RetryConfig;
use crate::error::DatabaseError;
use crate::store::Database;

pub struct RetryAgent {
    db: Arc<dyn Database>,
    config: RetryConfig,
}

impl RetryAgent {
    pub fn new(db: Arc<dyn Database>, config: RetryConfig) -> Self {
        Self { db, config }
    }

    /// One sweep: every transient failure with `attempts < max_attempts` goes
    /// back to `pending` with `attempts + 1`. Returns the re-queued ids.
    pub async fn run_once(&self) -> Result<Vec<i64>, DatabaseError> {
        let ids = self.db.requeue_failed(self.config.max_attempts).await?;
        if ids.is_empty() {
            debug!("Retry sweep found nothing to re-queue");
        } else {
            info!(count = ids.len(), ?ids, "Re-queued failed items");
        }
        Ok(ids)
    }
}

/// Spawn the retry loop.
///
/// Returns a `JoinHandle` and shutdown flag. The flag is checked between
/// sweeps.
pub fn spawn_retry_agent(agent: Arc<RetryAgent>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = agent.config.interval.as_secs(),
            max_attempts = agent.config.max_attempts,
            "Retry agent started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Retry agent shutting down");
                return;
            }

            let pause = match agent.run_once().await {
                Ok(_) => agent.config.interval,
                Err(e) => {
                    error!(error = %e, "Retry sweep failed; backing off");
                    agent.config.error_backoff
                }
            };
            tokio::time::sleep(pause).await;
        }
    });

    (handle, shutdown_flag)
}
