//! Task queue — bounded-concurrency priority scheduling per work class.
//!
//! DESIGN
//! ======
//! Three independent work classes, each with its own backlog and concurrency
//! ceiling: `generation` (3), `test_processing` (10), `proctoring` (50).
//! A backlog is a binary heap ordered by priority descending, submission
//! sequence ascending, so equal-priority tasks run in FIFO order.
//!
//! Claiming is the admission gate: a claim succeeds only while the class has
//! running capacity, so a worker loop that claims before spawning can never
//! exceed the ceiling. Failures retry up to three attempts, each retry
//! demoted one priority step; the third failure is terminal.
//!
//! Task records are retained for one hour after their last transition and
//! pruned lazily on access. A lookup after expiry is indistinguishable from
//! a lookup of a task that never existed.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::now_ms;

/// Attempts before a task is terminally failed.
pub const MAX_ATTEMPTS: u32 = 3;

/// Retention window for task records, from last transition.
pub const TASK_TTL_MS: i64 = 60 * 60 * 1000;

/// Worker poll interval when the backlog is empty or the class is saturated.
const IDLE_POLL: Duration = Duration::from_millis(200);

// =============================================================================
// TYPES
// =============================================================================

/// Work class. Each class has its own backlog and ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Generation,
    TestProcessing,
    Proctoring,
}

impl QueueClass {
    pub const ALL: [Self; 3] = [Self::Generation, Self::TestProcessing, Self::Proctoring];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::TestProcessing => "test_processing",
            Self::Proctoring => "proctoring",
        }
    }
}

/// Per-class concurrency ceilings.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub generation: usize,
    pub test_processing: usize,
    pub proctoring: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self { generation: 3, test_processing: 10, proctoring: 50 }
    }
}

impl QueueLimits {
    /// Ceilings from `QUEUE_*_LIMIT` env vars, with the defaults above.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            generation: env_limit("QUEUE_GENERATION_LIMIT", defaults.generation),
            test_processing: env_limit("QUEUE_TEST_PROCESSING_LIMIT", defaults.test_processing),
            proctoring: env_limit("QUEUE_PROCTORING_LIMIT", defaults.proctoring),
        }
    }

    #[must_use]
    fn for_class(&self, class: QueueClass) -> usize {
        match class {
            QueueClass::Generation => self.generation,
            QueueClass::TestProcessing => self.test_processing,
            QueueClass::Proctoring => self.proctoring,
        }
    }
}

fn env_limit(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// A claimed unit of work handed to a processor.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task_id: Uuid,
    pub class: QueueClass,
    pub payload: serde_json::Value,
    /// 1-based attempt number for this execution.
    pub attempt: u32,
}

/// Terminal record view returned by task lookup.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub task_id: Uuid,
    pub class: QueueClass,
    pub status: TaskStatus,
    pub priority: i32,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened to a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Requeued at the demoted priority for another attempt.
    Requeued { priority: i32 },
    /// Attempt budget exhausted; the record is terminal.
    Failed,
}

/// Processor error. The message lands on the task record.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TaskFailure {
    pub message: String,
}

impl TaskFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// A task executor for one work class.
#[async_trait]
pub trait ProcessTask: Send + Sync {
    async fn process(&self, task: &ClaimedTask) -> Result<serde_json::Value, TaskFailure>;
}

/// Per-class queue depth, running count, and remaining capacity.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClassSnapshot {
    pub queued: usize,
    pub running: usize,
    pub limit: usize,
    pub available: usize,
}

// =============================================================================
// INTERNALS
// =============================================================================

#[derive(Debug)]
struct TaskRecord {
    task_id: Uuid,
    class: QueueClass,
    status: TaskStatus,
    priority: i32,
    seq: u64,
    attempts: u32,
    payload: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
    updated_at: i64,
}

/// Backlog heap entry. Higher priority first; within a priority, earlier
/// submission sequence first.
#[derive(Debug, PartialEq, Eq)]
struct BacklogRef {
    priority: i32,
    seq: u64,
    task_id: Uuid,
}

impl Ord for BacklogRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for BacklogRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, TaskRecord>,
    backlogs: HashMap<QueueClass, BinaryHeap<BacklogRef>>,
    running: HashMap<QueueClass, usize>,
    next_seq: u64,
}

impl Inner {
    /// Drop records whose last transition is older than the retention
    /// window. Running tasks are exempt: their record must survive until
    /// `complete`/`fail` releases the capacity slot, however long the
    /// execution takes. Backlog refs to pruned tasks are discarded at claim
    /// time.
    fn prune(&mut self, now: i64) {
        self.tasks.retain(|_, task| {
            task.status == TaskStatus::Running || now - task.updated_at < TASK_TTL_MS
        });
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Shared task queue. Clone is cheap (Arc inner).
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<Inner>>,
    limits: QueueLimits,
}

impl TaskQueue {
    #[must_use]
    pub fn new(limits: QueueLimits) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), limits }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(QueueLimits::from_env())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a task. Returns the task id for status polling.
    pub fn submit(&self, class: QueueClass, priority: i32, payload: serde_json::Value) -> Uuid {
        self.submit_at(class, priority, payload, now_ms())
    }

    pub(crate) fn submit_at(&self, class: QueueClass, priority: i32, payload: serde_json::Value, now: i64) -> Uuid {
        let task_id = Uuid::new_v4();
        let mut inner = self.lock();
        inner.prune(now);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.insert(
            task_id,
            TaskRecord {
                task_id,
                class,
                status: TaskStatus::Queued,
                priority,
                seq,
                attempts: 0,
                payload,
                result: None,
                error: None,
                updated_at: now,
            },
        );
        inner
            .backlogs
            .entry(class)
            .or_default()
            .push(BacklogRef { priority, seq, task_id });
        debug!(%task_id, class = class.as_str(), priority, "task queued");
        task_id
    }

    /// Claim the highest-priority queued task, if the class has running
    /// capacity. Claiming marks the task running and counts it against the
    /// ceiling until `complete` or `fail`.
    pub fn claim(&self, class: QueueClass) -> Option<ClaimedTask> {
        self.claim_at(class, now_ms())
    }

    pub(crate) fn claim_at(&self, class: QueueClass, now: i64) -> Option<ClaimedTask> {
        let mut inner = self.lock();
        inner.prune(now);

        let running = inner.running.get(&class).copied().unwrap_or(0);
        if running >= self.limits.for_class(class) {
            return None;
        }

        // Pop refs until one matches a live queued record at its current
        // position. A requeue leaves a stale ref behind; skip those.
        loop {
            let backlog = inner.backlogs.get_mut(&class)?;
            let entry = backlog.pop()?;
            let Some(task) = inner.tasks.get_mut(&entry.task_id) else {
                continue;
            };
            if task.status != TaskStatus::Queued || task.priority != entry.priority || task.seq != entry.seq {
                continue;
            }

            task.status = TaskStatus::Running;
            task.attempts += 1;
            task.updated_at = now;
            let claimed = ClaimedTask {
                task_id: task.task_id,
                class,
                payload: task.payload.clone(),
                attempt: task.attempts,
            };
            *inner.running.entry(class).or_insert(0) += 1;
            return Some(claimed);
        }
    }

    /// Record a successful execution. No-op for unknown or expired tasks.
    pub fn complete(&self, task_id: Uuid, result: serde_json::Value) {
        self.complete_at(task_id, result, now_ms());
    }

    pub(crate) fn complete_at(&self, task_id: Uuid, result: serde_json::Value, now: i64) {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return;
        };
        if task.status != TaskStatus::Running {
            return;
        }
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.updated_at = now;
        let class = task.class;
        release(&mut inner, class);
        debug!(%task_id, class = class.as_str(), "task completed");
    }

    /// Record a failed execution. Retries with a one-step priority demotion
    /// until the attempt budget is exhausted, then fails terminally.
    pub fn fail(&self, task_id: Uuid, error: impl Into<String>) -> FailDisposition {
        self.fail_at(task_id, error, now_ms())
    }

    pub(crate) fn fail_at(&self, task_id: Uuid, error: impl Into<String>, now: i64) -> FailDisposition {
        let error = error.into();
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return FailDisposition::Failed;
        };
        if task.status != TaskStatus::Running {
            return FailDisposition::Failed;
        }

        task.error = Some(error.clone());
        task.updated_at = now;
        let class = task.class;

        if task.attempts >= MAX_ATTEMPTS {
            task.status = TaskStatus::Failed;
            release(&mut inner, class);
            error!(%task_id, class = class.as_str(), error = %error, "task failed terminally");
            return FailDisposition::Failed;
        }

        task.status = TaskStatus::Queued;
        task.priority -= 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return FailDisposition::Failed;
        };
        task.seq = seq;
        let entry = BacklogRef { priority: task.priority, seq, task_id };
        let priority = task.priority;
        inner.backlogs.entry(class).or_default().push(entry);
        release(&mut inner, class);
        warn!(%task_id, class = class.as_str(), priority, error = %error, "task requeued");
        FailDisposition::Requeued { priority }
    }

    /// Current record for a task, if it exists and has not expired.
    pub fn lookup(&self, task_id: Uuid) -> Option<TaskView> {
        self.lookup_at(task_id, now_ms())
    }

    pub(crate) fn lookup_at(&self, task_id: Uuid, now: i64) -> Option<TaskView> {
        let mut inner = self.lock();
        inner.prune(now);
        inner.tasks.get(&task_id).map(|task| TaskView {
            task_id: task.task_id,
            class: task.class,
            status: task.status,
            priority: task.priority,
            attempts: task.attempts,
            result: task.result.clone(),
            error: task.error.clone(),
        })
    }

    /// Queue depth and running count per class.
    pub fn snapshot(&self) -> HashMap<QueueClass, ClassSnapshot> {
        let mut inner = self.lock();
        inner.prune(now_ms());
        QueueClass::ALL
            .into_iter()
            .map(|class| {
                let queued = inner
                    .tasks
                    .values()
                    .filter(|t| t.class == class && t.status == TaskStatus::Queued)
                    .count();
                let running = inner.running.get(&class).copied().unwrap_or(0);
                let limit = self.limits.for_class(class);
                (class, ClassSnapshot { queued, running, limit, available: limit.saturating_sub(running) })
            })
            .collect()
    }

    /// Coarse load signal: `busy` when the generation class is saturated,
    /// `operational` otherwise.
    #[must_use]
    pub fn system_status(&self) -> &'static str {
        let inner = self.lock();
        let running = inner
            .running
            .get(&QueueClass::Generation)
            .copied()
            .unwrap_or(0);
        if running >= self.limits.generation {
            "busy"
        } else {
            "operational"
        }
    }
}

fn release(inner: &mut Inner, class: QueueClass) {
    if let Some(count) = inner.running.get_mut(&class) {
        *count = count.saturating_sub(1);
    }
}

// =============================================================================
// WORKER LOOP
// =============================================================================

/// Drive one work class: claim, spawn, report. The ceiling is enforced by
/// the claim gate, so in-flight executions never exceed the class limit.
pub fn spawn_worker(queue: TaskQueue, class: QueueClass, processor: Arc<dyn ProcessTask>) {
    tokio::spawn(async move {
        info!(class = class.as_str(), "queue worker started");
        loop {
            let Some(task) = queue.claim(class) else {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            };
            let queue = queue.clone();
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                let task_id = task.task_id;
                match processor.process(&task).await {
                    Ok(result) => queue.complete(task_id, result),
                    Err(failure) => {
                        queue.fail(task_id, failure.message);
                    }
                }
            });
        }
    });
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod tests;
