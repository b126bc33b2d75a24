//! Task store: lifecycle, cancellation and eviction of background work.
//!
//! A Task is created in `working` and moves through a small state machine:
//!
//! ```text
//! working ──► completed | failed | cancelled
//!    ▲ │
//!    │ ▼
//! input_required ──► failed | cancelled
//! ```
//!
//! Illegal transitions are rejected, never applied. A terminal Task is kept
//! for its TTL after the terminal transition and then evicted, whether or not
//! its result was ever read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetgate_config::TaskConfig;
use sheetgate_core::{Error, ErrorKind, TaskError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a Task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Working,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `self → next` is allowed. Staying in a non-terminal state is
    /// allowed so progress can be refreshed.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Working, Working | InputRequired | Completed | Failed | Cancelled)
                | (InputRequired, InputRequired | Working | Failed | Cancelled)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Working => "working",
            TaskState::InputRequired => "input_required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Machine-readable failure stored on a failed Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl From<&Error> for TaskFailure {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            retryable: error.is_retryable(),
            message: error.to_string(),
        }
    }
}

/// A durable handle to background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<DateTime<Utc>>,
    /// Retention after the terminal transition, in milliseconds.
    pub ttl_ms: u64,
    /// Populated only on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Populated only on `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

struct Record {
    task: Task,
    ttl: Duration,
    /// Monotonic terminal time, used for eviction.
    terminal_instant: Option<Instant>,
    token: CancellationToken,
    updates: watch::Sender<Task>,
}

impl Record {
    fn expired(&self, now: Instant) -> bool {
        self.terminal_instant
            .is_some_and(|at| now.saturating_duration_since(at) >= self.ttl)
    }

    fn transition(
        &mut self,
        next: TaskState,
        progress: Option<String>,
    ) -> Result<(), TaskError> {
        let from = self.task.state;
        if !from.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                id: self.task.id.clone(),
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        self.task.state = next;
        if progress.is_some() {
            self.task.progress = progress;
        }
        let now = Utc::now();
        self.task.updated_at = now;
        if next.is_terminal() {
            self.task.terminal_at = Some(now);
            self.terminal_instant = Some(Instant::now());
        }
        if from != next {
            info!(task_id = %self.task.id, from = %from, to = %next, "Task transition");
        }
        self.updates.send_replace(self.task.clone());
        Ok(())
    }
}

/// In-process store of Tasks.
///
/// Updates to one Task are serialized by the store's write lock.
pub struct TaskStore {
    default_ttl: Duration,
    tasks: RwLock<HashMap<String, Record>>,
}

impl TaskStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new(config.default_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Create a Task in `working`. `None` uses the store's default TTL.
    pub async fn create(&self, ttl: Option<Duration>) -> Task {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            state: TaskState::Working,
            progress: None,
            created_at: now,
            updated_at: now,
            terminal_at: None,
            ttl_ms: ttl.as_millis() as u64,
            result: None,
            error: None,
        };
        let (updates, _) = watch::channel(task.clone());
        let record = Record {
            task: task.clone(),
            ttl,
            terminal_instant: None,
            token: CancellationToken::new(),
            updates,
        };
        self.tasks.write().await.insert(task.id.clone(), record);
        info!(task_id = %task.id, ttl_ms = task.ttl_ms, "Task created");
        task
    }

    /// Run `f` against a live (non-expired) record.
    async fn with_record<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Record) -> Result<T, TaskError>,
    ) -> Result<T, Error> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(record) if !record.expired(Instant::now()) => Ok(f(record)?),
            _ => Err(TaskError::NotFound(id.to_string()).into()),
        }
    }

    /// Move a Task to `state`, optionally replacing its progress message.
    /// Moving to `cancelled` signals the Task's token like [`cancel`](Self::cancel).
    pub async fn update_status(
        &self,
        id: &str,
        state: TaskState,
        progress: Option<String>,
    ) -> Result<Task, Error> {
        self.with_record(id, |record| {
            record.transition(state, progress)?;
            if state == TaskState::Cancelled {
                record.token.cancel();
            }
            Ok(record.task.clone())
        })
        .await
    }

    /// Terminal success with a result payload.
    pub async fn complete(&self, id: &str, result: serde_json::Value) -> Result<Task, Error> {
        self.with_record(id, |record| {
            record.transition(TaskState::Completed, None)?;
            record.task.result = Some(result);
            record.updates.send_replace(record.task.clone());
            Ok(record.task.clone())
        })
        .await
    }

    /// Terminal failure with a machine-readable error.
    pub async fn fail(&self, id: &str, error: &Error) -> Result<Task, Error> {
        let failure = TaskFailure::from(error);
        let message = failure.message.clone();
        self.with_record(id, |record| {
            record.transition(TaskState::Failed, Some(message))?;
            record.task.error = Some(failure);
            record.updates.send_replace(record.task.clone());
            Ok(record.task.clone())
        })
        .await
    }

    /// Cancel a Task and signal its token.
    ///
    /// Only future steps are prevented. Physical calls already submitted are
    /// not undone; the progress message says how far the work got.
    pub async fn cancel(&self, id: &str) -> Result<Task, Error> {
        self.with_record(id, |record| {
            let message = match &record.task.progress {
                Some(progress) => format!(
                    "Cancelled ({progress}); already submitted calls are not undone"
                ),
                None => "Cancelled".to_string(),
            };
            record.transition(TaskState::Cancelled, Some(message))?;
            record.token.cancel();
            Ok(record.task.clone())
        })
        .await
    }

    /// Look up a Task. An expired Task is absent even before the sweep.
    pub async fn get(&self, id: &str) -> Result<Task, Error> {
        let tasks = self.tasks.read().await;
        match tasks.get(id) {
            Some(record) if !record.expired(Instant::now()) => Ok(record.task.clone()),
            _ => Err(TaskError::NotFound(id.to_string()).into()),
        }
    }

    /// The result of a completed Task.
    pub async fn get_result(&self, id: &str) -> Result<serde_json::Value, Error> {
        let task = self.get(id).await?;
        if task.state != TaskState::Completed {
            return Err(TaskError::ResultUnavailable {
                id: task.id,
                state: task.state.to_string(),
            }
            .into());
        }
        Ok(task.result.unwrap_or(serde_json::Value::Null))
    }

    /// Subscribe to every status change of a Task.
    pub async fn watch(&self, id: &str) -> Result<watch::Receiver<Task>, Error> {
        self.with_record(id, |record| Ok(record.updates.subscribe()))
            .await
    }

    /// The cancellation token observed by the Task's work.
    pub async fn cancellation_token(&self, id: &str) -> Result<CancellationToken, Error> {
        self.with_record(id, |record| Ok(record.token.clone())).await
    }

    /// Evict every Task whose terminal time plus TTL has passed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, record| !record.expired(now));
        let evicted = before - tasks.len();
        debug!(evicted, remaining = tasks.len(), "Task sweep");
        evicted
    }

    /// Number of Tasks held, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Start the periodic eviction sweep. A zero interval is raised to 1ms.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let interval = interval.max(Duration::from_millis(1));
        let store = Arc::clone(self);
        let token = CancellationToken::new();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        store.sweep().await;
                    }
                }
            }
            debug!("Task sweeper stopped");
        });

        info!(interval_ms = interval.as_millis() as u64, "Task sweeper started");
        SweeperHandle { token, handle }
    }
}

/// Stops the eviction sweep.
pub struct SweeperHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
