//! Background batch execution in chunks.
//!
//! The Intent list is split into fixed-size chunks executed one after
//! another. Cancellation is checked before each chunk; a chunk already handed
//! to the executor runs to completion.

use crate::runner::TaskContext;
use serde::Serialize;
use sheetgate_batch::{BatchExecutor, IntentResult};
use sheetgate_core::{Error, Intent};
use tracing::info;

/// The result payload of a finished [`BatchJob`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchJobReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<IntentResult>,
}

/// An Intent list to run behind a Task.
pub struct BatchJob {
    executor: BatchExecutor,
    intents: Vec<Intent>,
    chunk_size: usize,
}

impl BatchJob {
    pub fn new(executor: BatchExecutor, intents: Vec<Intent>, chunk_size: usize) -> Self {
        Self {
            executor,
            intents,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Execute every chunk, reporting `k of n` progress as chunks go out.
    ///
    /// Result indices refer to positions in the full Intent list.
    pub async fn run(self, ctx: TaskContext) -> Result<serde_json::Value, Error> {
        let total = self.intents.len();
        let mut results: Vec<IntentResult> = Vec::with_capacity(total);
        let mut submitted = 0usize;

        for chunk in self.intents.chunks(self.chunk_size) {
            if ctx.is_cancelled() {
                info!(task_id = %ctx.id(), submitted, total, "Batch job stopped by cancellation");
                break;
            }
            let offset = submitted;
            submitted += chunk.len();
            ctx.progress(format!("{submitted} of {total} intents submitted"))
                .await?;

            let chunk_results = self.executor.execute(chunk).await;
            results.extend(chunk_results.into_iter().map(|mut r| {
                r.index += offset;
                if let Err(failure) = &mut r.outcome {
                    failure.intent += offset;
                }
                r
            }));
        }

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let report = BatchJobReport {
            total,
            succeeded,
            failed: results.len() - succeeded,
            results,
        };
        info!(
            task_id = %ctx.id(),
            total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch job finished"
        );
        Ok(serde_json::to_value(&report)?)
    }
}
