//! Recurring job scheduler.
//!
//! Manages the standing background jobs with support for:
//! - Interval and timezone-aware cron triggers
//! - Misfire handling (late fires inside the grace window still run)
//! - At most one concurrent execution per job
//! - Per-job stats, a status query, and manual trigger-now
//!
//! Architecture: a single poll loop computes due jobs and sends
//! `SchedulerMessage`s over an mpsc channel; the executor runs job bodies as
//! independent tasks and reports completions back into the shared stats map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::ConfigError;
use crate::executor::Executor;
use crate::state::AppState;

/// Channel buffer size for scheduler -> executor messages.
pub const SCHEDULER_CHANNEL_SIZE: usize = 32;

/// Default poll interval for the scheduler loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// The standing jobs. A closed set: registration happens once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobId {
    SyncAllUsers,
    GenerateDailyBriefs,
}

impl JobId {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::SyncAllUsers => "sync_all_users",
            JobId::GenerateDailyBriefs => "generate_daily_briefs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync_all_users" => Some(JobId::SyncAllUsers),
            "generate_daily_briefs" => Some(JobId::GenerateDailyBriefs),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    Scheduled,
    /// Fired late, inside the misfire grace window.
    Missed,
    Manual,
}

/// Parse a 5-field cron expression.
///
/// The cron crate expects 6 fields (with seconds); prepend "0".
pub fn parse_cron(expr: &str) -> Result<Schedule, ConfigError> {
    let full_expr = format!("0 {}", expr);
    full_expr
        .parse::<Schedule>()
        .map_err(|e| ConfigError(format!("invalid cron expression '{}': {}", expr, e)))
}

#[derive(Debug, Clone)]
pub enum JobTrigger {
    Interval {
        every: Duration,
    },
    Cron {
        schedule: Schedule,
        expr: String,
        timezone: Tz,
    },
}

impl JobTrigger {
    pub fn interval_minutes(minutes: u64) -> Self {
        JobTrigger::Interval {
            every: Duration::from_secs(minutes.max(1) * 60),
        }
    }

    pub fn cron(expr: &str, timezone: &str) -> Result<Self, ConfigError> {
        let schedule = parse_cron(expr)?;
        let tz: Tz = timezone
            .parse()
            .map_err(|_| ConfigError(format!("invalid timezone: {}", timezone)))?;
        Ok(JobTrigger::Cron {
            schedule,
            expr: expr.to_string(),
            timezone: tz,
        })
    }

    pub fn describe(&self) -> String {
        match self {
            JobTrigger::Interval { every } => format!("interval[{}s]", every.as_secs()),
            JobTrigger::Cron { expr, timezone, .. } => format!("cron[{} @ {}]", expr, timezone),
        }
    }

    /// First fire time strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            JobTrigger::Interval { every } => Some(after + to_chrono(*every)),
            JobTrigger::Cron {
                schedule, timezone, ..
            } => schedule
                .after(&after.with_timezone(timezone))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// One registered recurring job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub name: String,
    pub trigger: JobTrigger,
    pub misfire_grace: Duration,
}

/// Accumulated execution statistics for one job.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub success_count: u64,
    pub error_count: u64,
    /// Firings skipped because the previous run was still in flight.
    pub skipped_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub name: String,
    pub trigger: String,
    pub next_fire: Option<DateTime<Utc>>,
    pub stats: JobStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub jobs: Vec<JobStatus>,
}

/// Message sent to trigger a job execution.
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub job: JobId,
    pub trigger: ExecutionTrigger,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("scheduler is shut down")]
    Closed,
}

/// State shared between the poll loop, the executor, and the handle.
pub struct SchedulerCore {
    specs: Vec<JobSpec>,
    stats: Mutex<HashMap<JobId, JobStats>>,
    next_fire: Mutex<HashMap<JobId, DateTime<Utc>>>,
}

impl SchedulerCore {
    pub fn new(specs: Vec<JobSpec>, now: DateTime<Utc>) -> Self {
        let next_fire = specs
            .iter()
            .filter_map(|spec| spec.trigger.next_fire_after(now).map(|at| (spec.id, at)))
            .collect();
        Self {
            specs,
            stats: Mutex::new(HashMap::new()),
            next_fire: Mutex::new(next_fire),
        }
    }

    pub fn is_registered(&self, job: JobId) -> bool {
        self.specs.iter().any(|spec| spec.id == job)
    }

    pub fn stats_for(&self, job: JobId) -> JobStats {
        self.stats.lock().get(&job).cloned().unwrap_or_default()
    }

    pub(crate) fn update_stats(&self, job: JobId, f: impl FnOnce(&mut JobStats)) {
        let mut stats = self.stats.lock();
        f(stats.entry(job).or_default());
    }

    /// Status for every registered job: trigger description, computed
    /// next-fire time, and the stats block.
    pub fn status(&self) -> SchedulerStatus {
        let next_fire = self.next_fire.lock();
        let stats = self.stats.lock();
        let jobs = self
            .specs
            .iter()
            .map(|spec| JobStatus {
                id: spec.id,
                name: spec.name.clone(),
                trigger: spec.trigger.describe(),
                next_fire: next_fire.get(&spec.id).copied(),
                stats: stats.get(&spec.id).cloned().unwrap_or_default(),
            })
            .collect();
        SchedulerStatus { jobs }
    }
}

/// The poll loop half of the scheduler.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    sender: mpsc::Sender<SchedulerMessage>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        core: Arc<SchedulerCore>,
        sender: mpsc::Sender<SchedulerMessage>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            core,
            sender,
            poll_interval,
        }
    }

    /// Run until the shutdown signal flips. Never blocks on a job body: due
    /// jobs are handed to the executor over the channel.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Scheduler started: {} job(s), polling every {}s",
            self.core.specs.len(),
            self.poll_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    log::info!("Scheduler loop stopping");
                    return;
                }
            }
            self.tick(Utc::now()).await;
        }
    }

    /// Check every job against the clock and dispatch what is due.
    pub(crate) async fn tick(&self, now: DateTime<Utc>) {
        let mut due = Vec::new();
        {
            let mut next_fire = self.core.next_fire.lock();
            for spec in &self.core.specs {
                let Some(at) = next_fire.get(&spec.id).copied() else {
                    continue;
                };
                if now < at {
                    continue;
                }

                if let Some(next) = spec.trigger.next_fire_after(now) {
                    next_fire.insert(spec.id, next);
                } else {
                    next_fire.remove(&spec.id);
                }

                let late = now - at;
                if late <= to_chrono(spec.misfire_grace) {
                    let trigger = if late > to_chrono(self.poll_interval) * 2 {
                        log::info!(
                            "Job {} fire at {} was missed by {}s, running within grace window",
                            spec.id,
                            at,
                            late.num_seconds()
                        );
                        ExecutionTrigger::Missed
                    } else {
                        ExecutionTrigger::Scheduled
                    };
                    due.push(SchedulerMessage {
                        job: spec.id,
                        trigger,
                    });
                } else {
                    log::warn!(
                        "Job {} missed its {} fire by {}s (grace {}s), skipping to next fire",
                        spec.id,
                        at,
                        late.num_seconds(),
                        spec.misfire_grace.as_secs()
                    );
                }
            }
        }

        for message in due {
            if self.sender.send(message.clone()).await.is_err() {
                log::error!("Failed to dispatch job {}: executor gone", message.job);
            }
        }
    }
}

/// Build the two standing jobs from config. Disabled schedules register
/// nothing.
pub fn standing_jobs(config: &Config) -> Result<Vec<JobSpec>, ConfigError> {
    let mut specs = Vec::new();

    if config.schedules.sync.enabled {
        specs.push(JobSpec {
            id: JobId::SyncAllUsers,
            name: "Sync all providers for all users".to_string(),
            trigger: JobTrigger::interval_minutes(config.schedules.sync.interval_minutes),
            misfire_grace: Duration::from_secs(config.schedules.sync.misfire_grace_secs),
        });
    }

    if config.schedules.briefs.enabled {
        specs.push(JobSpec {
            id: JobId::GenerateDailyBriefs,
            name: "Generate daily briefs for all users".to_string(),
            trigger: JobTrigger::cron(
                &config.schedules.briefs.cron,
                &config.schedules.briefs.timezone,
            )?,
            misfire_grace: Duration::from_secs(config.schedules.briefs.misfire_grace_secs),
        });
    }

    Ok(specs)
}

/// Running scheduler: poll loop + executor, plus the control surface a thin
/// HTTP layer would hold (`status`, `trigger_now`, `shutdown`).
pub struct SchedulerHandle {
    core: Arc<SchedulerCore>,
    sender: mpsc::Sender<SchedulerMessage>,
    shutdown: watch::Sender<bool>,
    scheduler_task: JoinHandle<()>,
    executor_task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Start the scheduler with the standing jobs from `state.config`.
    pub fn start(state: Arc<AppState>) -> Result<Self, ConfigError> {
        let specs = standing_jobs(&state.config)?;
        Ok(Self::start_with_specs(state, specs, DEFAULT_POLL_INTERVAL))
    }

    pub fn start_with_specs(
        state: Arc<AppState>,
        specs: Vec<JobSpec>,
        poll_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(SCHEDULER_CHANNEL_SIZE);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let core = Arc::new(SchedulerCore::new(specs, Utc::now()));

        let scheduler = Scheduler::new(core.clone(), sender.clone(), poll_interval);
        let scheduler_task = tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        });

        let executor = Executor::new(state, core.clone());
        let executor_task = tokio::spawn(async move {
            executor.run(receiver).await;
        });

        Self {
            core,
            sender,
            shutdown,
            scheduler_task,
            executor_task,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.core.status()
    }

    pub fn stats_for(&self, job: JobId) -> JobStats {
        self.core.stats_for(job)
    }

    /// Force a named job to run immediately, independent of its schedule.
    pub async fn trigger_now(&self, job_id: &str) -> Result<(), TriggerError> {
        let job = JobId::parse(job_id)
            .filter(|job| self.core.is_registered(*job))
            .ok_or_else(|| TriggerError::UnknownJob(job_id.to_string()))?;

        log::info!("Manual trigger for job {}", job);
        self.sender
            .send(SchedulerMessage {
                job,
                trigger: ExecutionTrigger::Manual,
            })
            .await
            .map_err(|_| TriggerError::Closed)
    }

    /// Stop firing new jobs and wait for in-flight executions to finish.
    pub async fn shutdown(self) {
        log::info!("Shutting down scheduler");
        let _ = self.shutdown.send(true);
        // The poll loop exits and drops its sender; once ours goes too, the
        // executor sees the channel close, drains in-flight work, and returns.
        drop(self.sender);
        let _ = self.scheduler_task.await;
        let _ = self.executor_task.await;
        log::info!("Scheduler shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cron_weekdays() {
        assert!(parse_cron("0 8 * * 1-5").is_ok());
        assert!(parse_cron("0 7 * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn test_job_id_round_trip() {
        for job in [JobId::SyncAllUsers, JobId::GenerateDailyBriefs] {
            assert_eq!(JobId::parse(job.as_str()), Some(job));
        }
        assert_eq!(JobId::parse("nope"), None);
    }

    #[test]
    fn test_interval_next_fire() {
        let trigger = JobTrigger::interval_minutes(30);
        let now = Utc::now();
        let next = trigger.next_fire_after(now).expect("next");
        assert_eq!((next - now).num_minutes(), 30);
    }

    #[test]
    fn test_cron_next_fire_is_seven_utc() {
        let trigger = JobTrigger::cron("0 7 * * *", "UTC").expect("trigger");
        let after = DateTime::parse_from_rfc3339("2026-08-07T08:00:00Z")
            .expect("date")
            .with_timezone(&Utc);
        let next = trigger.next_fire_after(after).expect("next");
        assert_eq!(next.format("%H:%M").to_string(), "07:00");
        assert!(next > after);
    }

    #[test]
    fn test_cron_invalid_timezone_rejected() {
        assert!(JobTrigger::cron("0 7 * * *", "Mars/Olympus").is_err());
    }

    #[test]
    fn test_trigger_description() {
        let interval = JobTrigger::interval_minutes(30);
        assert_eq!(interval.describe(), "interval[1800s]");
        let cron = JobTrigger::cron("0 7 * * *", "UTC").expect("trigger");
        assert_eq!(cron.describe(), "cron[0 7 * * * @ UTC]");
    }

    #[test]
    fn test_standing_jobs_respect_enabled_flags() {
        let mut config = Config::default();
        let specs = standing_jobs(&config).expect("specs");
        assert_eq!(specs.len(), 2);

        config.schedules.briefs.enabled = false;
        let specs = standing_jobs(&config).expect("specs");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, JobId::SyncAllUsers);
    }

    fn test_spec(grace_secs: u64) -> JobSpec {
        JobSpec {
            id: JobId::SyncAllUsers,
            name: "sync".to_string(),
            trigger: JobTrigger::interval_minutes(30),
            misfire_grace: Duration::from_secs(grace_secs),
        }
    }

    async fn tick_with_due(
        spec: JobSpec,
        overdue_by: chrono::Duration,
    ) -> (Option<SchedulerMessage>, Arc<SchedulerCore>) {
        let now = Utc::now();
        let core = Arc::new(SchedulerCore::new(vec![spec], now));
        core.next_fire
            .lock()
            .insert(JobId::SyncAllUsers, now - overdue_by);

        let (sender, mut receiver) = mpsc::channel(4);
        let scheduler = Scheduler::new(core.clone(), sender, Duration::from_secs(60));
        scheduler.tick(now).await;
        (receiver.try_recv().ok(), core)
    }

    #[tokio::test]
    async fn test_due_job_fires_as_scheduled() {
        let (message, _) = tick_with_due(test_spec(300), chrono::Duration::seconds(5)).await;
        let message = message.expect("dispatched");
        assert_eq!(message.job, JobId::SyncAllUsers);
        assert_eq!(message.trigger, ExecutionTrigger::Scheduled);
    }

    #[tokio::test]
    async fn test_late_fire_inside_grace_runs_as_missed() {
        let (message, _) = tick_with_due(test_spec(300), chrono::Duration::seconds(200)).await;
        let message = message.expect("dispatched");
        assert_eq!(message.trigger, ExecutionTrigger::Missed);
    }

    #[tokio::test]
    async fn test_fire_outside_grace_is_skipped_to_next() {
        let (message, core) =
            tick_with_due(test_spec(300), chrono::Duration::seconds(4000)).await;
        assert!(message.is_none());

        // The schedule still advanced past now
        let next = core
            .next_fire
            .lock()
            .get(&JobId::SyncAllUsers)
            .copied()
            .expect("next fire");
        assert!(next > Utc::now());
    }

    #[tokio::test]
    async fn test_not_yet_due_job_does_not_fire() {
        let now = Utc::now();
        let core = Arc::new(SchedulerCore::new(vec![test_spec(300)], now));
        let (sender, mut receiver) = mpsc::channel(4);
        let scheduler = Scheduler::new(core, sender, Duration::from_secs(60));
        scheduler.tick(now).await;
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_status_reports_all_jobs() {
        let now = Utc::now();
        let core = SchedulerCore::new(vec![test_spec(300)], now);
        core.update_stats(JobId::SyncAllUsers, |stats| {
            stats.success_count = 3;
        });

        let status = core.status();
        assert_eq!(status.jobs.len(), 1);
        let job = &status.jobs[0];
        assert_eq!(job.id, JobId::SyncAllUsers);
        assert!(job.next_fire.expect("next") > now);
        assert_eq!(job.stats.success_count, 3);
        assert!(job.trigger.starts_with("interval["));
    }
}
