//! Job execution engine.
//!
//! Receives firing requests from the scheduler loop and runs each job body as
//! an independent task. Enforces the one-instance-per-job constraint, updates
//! the shared stats map on completion, and keeps running through any job
//! failure: an error (or panic) in a job body is logged and counted, never
//! propagated.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::error::JobExecutionError;
use crate::scheduler::{JobId, SchedulerCore, SchedulerMessage};
use crate::state::AppState;

/// Outcome of one job run: per-user success/failure tallies.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobRunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

type JobCompletion = (
    JobId,
    DateTime<Utc>,
    std::time::Duration,
    Result<JobRunSummary, JobExecutionError>,
);

pub struct Executor {
    state: Arc<AppState>,
    core: Arc<SchedulerCore>,
}

impl Executor {
    pub fn new(state: Arc<AppState>, core: Arc<SchedulerCore>) -> Self {
        Self { state, core }
    }

    /// Listen for firing requests until the channel closes, then drain
    /// in-flight executions before returning (graceful shutdown).
    pub async fn run(&self, mut receiver: mpsc::Receiver<SchedulerMessage>) {
        let mut in_flight: JoinSet<JobCompletion> = JoinSet::new();
        let mut running: HashSet<JobId> = HashSet::new();

        loop {
            tokio::select! {
                maybe = receiver.recv() => {
                    match maybe {
                        Some(message) => self.dispatch(message, &mut in_flight, &mut running),
                        None => break,
                    }
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.complete(done, &mut running);
                }
            }
        }

        if !in_flight.is_empty() {
            log::info!("Draining {} in-flight job(s) before shutdown", in_flight.len());
        }
        while let Some(done) = in_flight.join_next().await {
            self.complete(done, &mut running);
        }
    }

    fn dispatch(
        &self,
        message: SchedulerMessage,
        in_flight: &mut JoinSet<JobCompletion>,
        running: &mut HashSet<JobId>,
    ) {
        let job = message.job;
        if running.contains(&job) {
            log::warn!(
                "Job {} is still running, skipping {:?} firing",
                job,
                message.trigger
            );
            self.core.update_stats(job, |stats| stats.skipped_count += 1);
            return;
        }

        log::info!("Executing job {} (trigger: {:?})", job, message.trigger);
        running.insert(job);

        let state = self.state.clone();
        in_flight.spawn(async move {
            let started_at = Utc::now();
            let timer = Instant::now();
            // Inner spawn so a panicking job body surfaces as a JoinError
            // here instead of killing the executor loop.
            let body = tokio::spawn(run_job(job, state));
            let result = match body.await {
                Ok(result) => result,
                Err(e) => Err(JobExecutionError(format!("job body panicked: {}", e))),
            };
            (job, started_at, timer.elapsed(), result)
        });
    }

    fn complete(
        &self,
        done: Result<JobCompletion, tokio::task::JoinError>,
        running: &mut HashSet<JobId>,
    ) {
        let Ok((job, started_at, elapsed, result)) = done else {
            // The wrapper task itself never panics; nothing to attribute.
            log::error!("Job wrapper task failed to join");
            return;
        };

        running.remove(&job);
        self.core.update_stats(job, |stats| {
            stats.last_run = Some(started_at);
            stats.last_duration_ms = Some(elapsed.as_millis() as u64);
            match &result {
                Ok(_) => {
                    stats.success_count += 1;
                    stats.last_error = None;
                }
                Err(e) => {
                    stats.error_count += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        });

        match result {
            Ok(summary) => log::info!(
                "Job {} complete in {:.2}s: {} succeeded, {} failed",
                job,
                elapsed.as_secs_f64(),
                summary.succeeded,
                summary.failed
            ),
            Err(e) => log::error!("Job {} failed: {}", job, e),
        }
    }
}

async fn run_job(job: JobId, state: Arc<AppState>) -> Result<JobRunSummary, JobExecutionError> {
    match job {
        JobId::SyncAllUsers => sync_all_users(state).await,
        JobId::GenerateDailyBriefs => generate_daily_briefs(state).await,
    }
}

/// Sync every user holding at least one active integration.
///
/// Users run as independent bounded tasks; one user's total failure never
/// stops the batch.
async fn sync_all_users(state: Arc<AppState>) -> Result<JobRunSummary, JobExecutionError> {
    let users = state
        .credentials
        .users_with_active_integrations()
        .await
        .map_err(|e| JobExecutionError(format!("failed to list users: {}", e)))?;

    log::info!("Syncing {} user(s) with active integrations", users.len());

    let limit = state.config.sync.max_concurrent_users.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();

    for user_id in users {
        let coordinator = state.coordinator.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let report = coordinator.sync_user(&user_id).await;
            (user_id, report)
        });
    }

    let mut summary = JobRunSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((user_id, report)) => {
                if report.synced.is_empty() && !report.failures.is_empty() {
                    summary.failed += 1;
                    log::error!("Every provider failed for user {}", user_id);
                } else {
                    summary.succeeded += 1;
                }
            }
            Err(e) => {
                summary.failed += 1;
                log::error!("User sync task panicked: {}", e);
            }
        }
    }

    Ok(summary)
}

/// Generate today's brief for every active user, with the same per-user
/// isolation policy as the sync job.
async fn generate_daily_briefs(state: Arc<AppState>) -> Result<JobRunSummary, JobExecutionError> {
    let users = state
        .store
        .active_users()
        .await
        .map_err(|e| JobExecutionError(format!("failed to list users: {}", e)))?;

    let today = Utc::now().date_naive();
    log::info!("Generating briefs for {} active user(s)", users.len());

    let limit = state.config.sync.max_concurrent_users.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();

    for user in users {
        let briefs = state.briefs.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let result = briefs.generate_brief(&user.id, today).await;
            (user.id, result)
        });
    }

    let mut summary = JobRunSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(_))) => summary.succeeded += 1,
            Ok((user_id, Err(e))) => {
                summary.failed += 1;
                log::error!("Brief generation failed for user {}: {}", user_id, e);
            }
            Err(e) => {
                summary.failed += 1;
                log::error!("Brief task panicked: {}", e);
            }
        }
    }

    Ok(summary)
}
