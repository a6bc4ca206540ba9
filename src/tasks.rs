//! Background work: availability refreshes, map regeneration, badge sweeps
//! and clean-up after a quest is hidden.
//!
//! Transitions only record the tasks they need; the deck hands them to this
//! pool after its write lock is released. Workers share one receiver, run each
//! job under a timeout and retry with exponential backoff plus jitter. A job
//! that keeps failing lands in the deck's failed-task list and its originator
//! is notified.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineTuning;
use crate::deck::Deck;
use crate::domain::{EntityKind, MapId, QuestId, UserId};
use crate::error::EngineError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    RefreshAvailability { user_id: UserId },
    /// Recompute every student's list for one kind, bunched per user.
    RefreshAvailabilityAllUsers { kind: EntityKind },
    /// The single delayed rerun for users coalesced by a bunching window.
    RefreshDeferred,
    RegenerateMap { map_id: MapId },
    RegenerateAllMaps { requesting_user: Option<UserId> },
    BadgeSweep { user_id: UserId },
    RemoveSubmissionsForHiddenQuest { quest_id: QuestId },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::RefreshAvailability { .. } => "refresh_availability",
            Task::RefreshAvailabilityAllUsers { .. } => "refresh_availability_all_users",
            Task::RefreshDeferred => "refresh_deferred",
            Task::RegenerateMap { .. } => "regenerate_map",
            Task::RegenerateAllMaps { .. } => "regenerate_all_maps",
            Task::BadgeSweep { .. } => "badge_sweep",
            Task::RemoveSubmissionsForHiddenQuest { .. } => "remove_submissions_for_hidden_quest",
        }
    }
}

/// A task plus who asked for it and how often it has been tried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub task: Task,
    pub originator: Option<UserId>,
    pub attempts: u32,
}

impl Job {
    pub fn new(task: Task, originator: Option<UserId>) -> Self {
        Self { task, originator, attempts: 0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailedTask {
    pub task: Task,
    pub originator: Option<UserId>,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

pub type TaskReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Sending half of the task channel.
#[derive(Clone, Debug)]
pub struct TaskQueue {
    tx: mpsc::Sender<Job>,
}

impl TaskQueue {
    pub fn channel(capacity: usize) -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, Arc::new(Mutex::new(rx)))
    }

    /// Never blocks; a full or closed queue is reported so the caller can run
    /// the job inline.
    pub fn submit(&self, job: Job) -> std::result::Result<(), (Job, EngineError)> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => Err((job, EngineError::Queue("task queue full".into()))),
            Err(mpsc::error::TrySendError::Closed(job)) => Err((job, EngineError::Queue("task queue closed".into()))),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Retry schedule for a job: `base * 2^(attempt-1)` plus up to `base` of jitter,
/// capped at one minute.
pub fn backoff_delay(base_ms: u64, attempt: u32, jitter_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = base_ms.saturating_mul(1u64 << exp).saturating_add(jitter_ms.min(base_ms));
    Duration::from_millis(ms.min(60_000))
}

fn jitter(base_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=base_ms)
}

#[derive(Clone, Copy, Debug)]
struct RetryPolicy {
    timeout: Duration,
    retry_cap: u32,
    backoff_base_ms: u64,
}

/// Start `tuning.worker_count` workers draining `rx` against `deck`.
pub fn spawn_workers(rx: TaskReceiver, deck: Arc<Deck>, tuning: &EngineTuning) -> Vec<JoinHandle<()>> {
    let policy = RetryPolicy {
        timeout: tuning.task_timeout(),
        retry_cap: tuning.task_retry_cap.max(1),
        backoff_base_ms: tuning.task_backoff_base_ms,
    };
    let count = tuning.worker_count.max(1);
    info!(target: "tasks", workers = count, "Starting task workers");
    (0..count)
        .map(|i| {
            let rx = Arc::clone(&rx);
            let deck = Arc::clone(&deck);
            tokio::spawn(async move { worker_task(i, rx, deck, policy).await })
        })
        .collect()
}

async fn worker_task(worker_id: usize, rx: TaskReceiver, deck: Arc<Deck>, policy: RetryPolicy) {
    debug!(target: "tasks", worker_id, "Worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => {
                    info!(target: "tasks", worker_id, "Worker shutting down (channel closed)");
                    return;
                }
            }
        };
        run_with_retries(&deck, job, policy, worker_id).await;
    }
}

async fn run_with_retries(deck: &Arc<Deck>, mut job: Job, policy: RetryPolicy, worker_id: usize) {
    loop {
        job.attempts += 1;
        let outcome = match tokio::time::timeout(policy.timeout, deck.run_task(&job.task)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Queue(format!("{} timed out after {:?}", job.task.name(), policy.timeout))),
        };
        match outcome {
            Ok(()) => {
                debug!(target: "tasks", worker_id, task = job.task.name(), attempts = job.attempts, "Task done");
                return;
            }
            Err(e) if job.attempts < policy.retry_cap && retryable(&e) => {
                let delay = backoff_delay(policy.backoff_base_ms, job.attempts, jitter(policy.backoff_base_ms));
                warn!(
                    target: "tasks",
                    worker_id,
                    task = job.task.name(),
                    attempts = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(target: "tasks", worker_id, task = job.task.name(), attempts = job.attempts, error = %e, "Task gave up");
                deck.record_failed_task(job, e).await;
                return;
            }
        }
    }
}

/// Failures that another attempt cannot fix.
fn retryable(e: &EngineError) -> bool {
    !matches!(
        e,
        EngineError::NotFound(_) | EngineError::MissingSeed { .. } | EngineError::PermissionDenied(_)
    )
}
