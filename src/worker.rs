//! The allocator worker: one long-running task per course id, each the
//! single consumer of that course's intake queue, each running the
//! IDLE -> pop -> decode -> allocate -> IDLE state machine against the
//! transactional rule in [`crate::db`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::db::{self, DbPool};
use crate::models::AllocationOutcome;
use crate::queue::{self, IntakeQueue};

/// Runs the IDLE -> pop -> decode -> allocate -> IDLE loop for one course
/// until told to shut down. Pop is destructive and at-most-once: on any
/// failure past the pop the item is dropped, never re-enqueued.
pub async fn run_allocator(
    course_id: i64,
    pool: DbPool,
    queue: Arc<dyn IntakeQueue>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(course_id, "Starting allocator worker");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.pop_min(course_id).await {
            Ok(Some(raw)) => {
                let req = match queue::decode_member(&raw) {
                    Ok(req) => req,
                    Err(e) => {
                        // Already destructively popped; a malformed member
                        // can never be retried, so log and drop without the
                        // transient-error backoff.
                        warn!(course_id, error = %e, %raw, "Malformed queued member dropped");
                        metrics::counter!("enrollment_requests_total", "status" => "error").increment(1);
                        continue;
                    }
                };

                debug!(course_id, idempotency_key = %req.idempotency_key, "Popped queued request");

                let outcome = timeout(config.allocation_timeout, db::allocate_seat(&pool, &req)).await;

                match outcome {
                    Ok(Ok(result)) => {
                        record_outcome(course_id, &req.idempotency_key, result);
                    }
                    Ok(Err(e)) => {
                        error!(
                            course_id,
                            idempotency_key = %req.idempotency_key,
                            error = %e,
                            "Allocation transaction failed, item dropped (client retry is the recovery path)"
                        );
                        metrics::counter!("enrollment_requests_total", "status" => "error").increment(1);
                        if cancellable_sleep(config.error_backoff, &mut shutdown).await {
                            break;
                        }
                    }
                    Err(_) => {
                        warn!(
                            course_id,
                            idempotency_key = %req.idempotency_key,
                            timeout_secs = config.allocation_timeout.as_secs(),
                            "Allocation transaction timed out, item dropped"
                        );
                        metrics::counter!("enrollment_requests_total", "status" => "error").increment(1);
                        if cancellable_sleep(config.error_backoff, &mut shutdown).await {
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                if cancellable_sleep(config.empty_backoff, &mut shutdown).await {
                    break;
                }
            }
            Err(e) => {
                error!(course_id, error = %e, "Queue pop failed, backing off");
                if cancellable_sleep(config.error_backoff, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    info!(course_id, "Allocator worker shut down");
}

/// Logs the terminal allocation outcome. The `enrollment_requests_total`
/// counter's `queued` status is incremented at intake (`handlers::enroll`);
/// this only adds to it on the `error` path, matched above.
fn record_outcome(course_id: i64, idempotency_key: &str, outcome: AllocationOutcome) {
    info!(
        course_id,
        idempotency_key,
        outcome = outcome.as_str(),
        "Allocation transaction completed"
    );
}

/// Sleeps for `duration` unless a shutdown signal arrives first. Returns
/// `true` if shutdown was observed and the caller should stop looping.
async fn cancellable_sleep(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

/// Owns the per-course allocator tasks and the shutdown signal they all
/// select against. One supervisor per process, mirroring the spawn-one-
/// task-per-key / single-shutdown-broadcast shape of this codebase's other
/// per-entity background systems.
pub struct WorkerSupervisor {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerSupervisor {
    /// Discovers the current set of courses and spawns one allocator task
    /// per course id.
    pub async fn start(
        pool: DbPool,
        queue: Arc<dyn IntakeQueue>,
        config: WorkerConfig,
    ) -> anyhow::Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let course_ids = db::list_course_ids(&pool).await?;

        info!(course_count = course_ids.len(), "Spawning allocator workers");

        let mut handles = Vec::with_capacity(course_ids.len());
        for course_id in course_ids {
            let pool = pool.clone();
            let queue = queue.clone();
            let shutdown_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                run_allocator(course_id, pool, queue, config, shutdown_rx).await;
            }));
        }

        Ok(Self { shutdown_tx, handles })
    }

    /// Signals every allocator task to finish its in-flight iteration and
    /// exit, then waits for them to join. Unpopped queue items are left
    /// untouched in Redis.
    pub async fn shutdown(self) {
        info!("Signaling allocator workers to shut down");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("All allocator workers stopped");
    }
}
