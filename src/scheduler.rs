use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::Notify;

use crate::rdm::Action;

/// Upper bound on how long the dispatch loop sleeps with nothing due.
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum Trigger {
    Immediate,
    At(DateTime<Utc>),
    Cron { schedule: Box<Schedule>, timezone: Tz },
}

impl Trigger {
    pub fn cron(expression: &str, timezone: Tz) -> Result<Self, JobError> {
        let schedule = Schedule::from_str(expression).map_err(|e| JobError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::Cron {
            schedule: Box::new(schedule),
            timezone,
        })
    }

    fn first_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Immediate => Some(now),
            Self::At(at) => Some(*at),
            Self::Cron { .. } => self.next_after(now),
        }
    }

    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { schedule, timezone } => schedule
                .after(&after.with_timezone(timezone))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    fn recurs(&self) -> bool {
        matches!(self, Self::Cron { .. })
    }
}

/// What a job does when it fires, together with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTask {
    AssignmentGroup { groups: Vec<String>, action: Action },
    RefreshEvents,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub task: JobTask,
    pub trigger: Trigger,
    pub next_run_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Generated when absent.
    pub id: Option<String>,
    pub name: String,
    pub task: JobTask,
    pub trigger: Trigger,
    pub replace_existing: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job '{0}' already exists")]
    Conflict(String),
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}

#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: &Job) -> Result<()>;
}

/// In-memory job table plus the loop that fires due jobs.
#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
    /// Recurring jobs with an instance currently executing.
    active: Mutex<HashSet<String>>,
    wake: Notify,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, spec: JobSpec, now: DateTime<Utc>) -> Result<String, JobError> {
        let id = match spec.id {
            Some(id) => id,
            None => format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
        };
        let job = Job {
            next_run_time: spec.trigger.first_run(now),
            id: id.clone(),
            name: spec.name,
            task: spec.task,
            trigger: spec.trigger,
        };

        {
            let mut jobs = self.lock_jobs();
            if jobs.contains_key(&id) && !spec.replace_existing {
                return Err(JobError::Conflict(id));
            }
            tracing::info!(
                "Job added: {} ({}) next run {:?}",
                job.id,
                job.name,
                job.next_run_time
            );
            jobs.insert(id.clone(), job);
        }
        self.wake.notify_one();
        Ok(id)
    }

    /// Returns whether a job was removed; unknown ids are a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.lock_jobs().remove(id).is_some();
        if removed {
            tracing::info!("Job removed: {id}");
        }
        removed
    }

    pub fn modify(&self, id: &str, task: JobTask) -> bool {
        match self.lock_jobs().get_mut(id) {
            Some(job) => {
                job.task = task;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock_jobs().get(id).cloned()
    }

    /// All jobs ordered by next run time, soonest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock_jobs().values().cloned().collect();
        jobs.sort_by(|a, b| match (a.next_run_time, b.next_run_time) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });
        jobs
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Pulls every job due at `now`. One-shot jobs leave the table; recurring
    /// jobs are advanced and marked active until [`JobStore::finish`].
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = self.lock_jobs();
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let due_ids: Vec<String> = jobs
            .values()
            .filter(|j| j.next_run_time.is_some_and(|t| t <= now))
            .map(|j| j.id.clone())
            .collect();

        let mut due = Vec::new();
        for id in due_ids {
            let Some(job) = jobs.get_mut(&id) else {
                continue;
            };
            if !job.trigger.recurs() {
                if let Some(job) = jobs.remove(&id) {
                    due.push(job);
                }
                continue;
            }

            let fired = job.clone();
            job.next_run_time = job.trigger.next_after(now);
            if active.contains(&id) {
                tracing::warn!("Job {id} still running, skipping this run (max instances 1)");
            } else {
                active.insert(id.clone());
                due.push(fired);
            }
            if job.next_run_time.is_none() {
                jobs.remove(&id);
            }
        }
        due.sort_by_key(|j| j.next_run_time);
        due
    }

    pub fn finish(&self, id: &str) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.lock_jobs().values().filter_map(|j| j.next_run_time).min()
    }

    pub async fn run(self: Arc<Self>, runner: Arc<dyn JobRunner>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Job scheduler already running");
            return;
        }
        tracing::info!("Job scheduler started");

        loop {
            for job in self.take_due(Utc::now()) {
                let store = self.clone();
                let runner = runner.clone();
                tokio::spawn(async move {
                    tracing::info!("Running job {} ({})", job.id, job.name);
                    if let Err(e) = runner.run_job(&job).await {
                        tracing::error!("Job {} failed: {e:#}", job.id);
                    }
                    store.finish(&job.id);
                });
            }

            let sleep_for = self
                .next_wakeup()
                .map(|t| (t - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(IDLE_WAKEUP)
                .min(IDLE_WAKEUP);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
