//! Running work behind a Task.

use crate::store::{Task, TaskState, TaskStore};
use sheetgate_core::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

/// Handed to background work: reports progress and exposes cancellation.
#[derive(Clone)]
pub struct TaskContext {
    id: String,
    store: Arc<TaskStore>,
    token: CancellationToken,
}

impl TaskContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the Task is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Replace the progress message. Fails once the Task is terminal.
    pub async fn progress(&self, message: impl Into<String>) -> Result<(), Error> {
        self.store
            .update_status(&self.id, TaskState::Working, Some(message.into()))
            .await
            .map(|_| ())
    }

    /// Park the Task in `input_required` until someone moves it back.
    pub async fn request_input(&self, message: impl Into<String>) -> Result<(), Error> {
        self.store
            .update_status(&self.id, TaskState::InputRequired, Some(message.into()))
            .await
            .map(|_| ())
    }
}

impl TaskStore {
    /// Create a Task and run `work` for it on the runtime.
    ///
    /// `Ok` completes the Task with the returned value, `Err` fails it. If the
    /// Task was cancelled meanwhile, the outcome is dropped.
    pub async fn spawn<F, Fut>(self: &Arc<Self>, ttl: Option<Duration>, work: F) -> Result<Task, Error>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value, Error>> + Send + 'static,
    {
        let task = self.create(ttl).await;
        let ctx = TaskContext {
            id: task.id.clone(),
            store: Arc::clone(self),
            token: self.cancellation_token(&task.id).await?,
        };

        let store = Arc::clone(self);
        let id = task.id.clone();
        tokio::spawn(async move {
            let token = ctx.token.clone();
            let outcome = work(ctx).await;
            if token.is_cancelled() {
                debug!(task_id = %id, "Work finished after cancellation, outcome dropped");
                return;
            }
            let recorded = match outcome {
                Ok(value) => store.complete(&id, value).await,
                Err(error) => store.fail(&id, &error).await,
            };
            if let Err(e) = recorded {
                warn!(task_id = %id, error = %e, "Could not record task outcome");
            }
        });

        Ok(task)
    }
}
