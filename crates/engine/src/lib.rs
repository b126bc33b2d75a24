//! The orchestration engine.
//!
//! [`Engine`] wires one external client to its rate limiter, circuit breaker
//! and request deduplicator, and owns the [`TaskStore`] used for background
//! batch submissions. Every physical call made on behalf of the client,
//! whether foreground or from a background job, shares the same resilience
//! state.

use sheetgate_batch::{BatchExecutor, CompiledBatch, IntentResult, compile};
use sheetgate_config::EngineConfig;
use sheetgate_core::{Error, Intent, SheetsClient};
use sheetgate_resilience::{BreakerSnapshot, CircuitBreaker, RateLimiter, RequestDeduplicator};
use sheetgate_tasks::{BatchJob, SweeperHandle, Task, TaskStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

pub struct Engine {
    config: EngineConfig,
    executor: BatchExecutor,
    tasks: Arc<TaskStore>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl Engine {
    /// Build an engine around `client`. Fails if `config` does not validate.
    pub fn new(config: EngineConfig, client: Arc<dyn SheetsClient>) -> Result<Self, Error> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let target = client.name().to_string();
        let breaker = Arc::new(CircuitBreaker::from_config(target.clone(), &config.breaker));
        let limiter = Arc::new(RateLimiter::from_config(target.clone(), &config.rate_limit));
        let dedup = Arc::new(RequestDeduplicator::new(config.dedupe.ttl()));
        let executor = BatchExecutor::new(client, breaker, limiter, dedup)
            .with_per_fragment_outcomes(config.client.per_fragment_outcomes);
        let tasks = Arc::new(TaskStore::from_config(&config.tasks));

        info!(
            target = %target,
            max_tokens = config.rate_limit.max_tokens,
            failure_threshold = config.breaker.failure_threshold,
            "Engine initialized"
        );

        Ok(Self {
            config,
            executor,
            tasks,
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// Compile without executing.
    pub fn plan(&self, intents: &[Intent]) -> CompiledBatch {
        compile(intents)
    }

    /// Compile and execute in the foreground.
    pub async fn execute(&self, intents: &[Intent]) -> Vec<IntentResult> {
        self.executor.execute(intents).await
    }

    pub async fn execute_compiled(&self, batch: &CompiledBatch) -> Vec<IntentResult> {
        self.executor.execute_compiled(batch).await
    }

    /// Run `intents` behind a Task and return it immediately in `working`.
    ///
    /// The list is executed in chunks of `tasks.background_chunk_size`
    /// Intents; the finished Task's result is a batch job report.
    pub async fn submit(&self, intents: Vec<Intent>, ttl: Option<Duration>) -> Result<Task, Error> {
        let job = BatchJob::new(
            self.executor.clone(),
            intents,
            self.config.tasks.background_chunk_size,
        );
        let intents = job.len();
        let task = self.tasks.spawn(ttl, move |ctx| job.run(ctx)).await?;
        info!(task_id = %task.id, intents, "Background batch submitted");
        Ok(task)
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.executor.breaker().snapshot()
    }

    /// Start the task eviction sweep. Calling it again is a no-op.
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() {
            *sweeper = Some(self.tasks.start_sweeper(self.config.tasks.sweep_interval()));
        }
    }

    /// Stop the eviction sweep. Tasks already running are left alone.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.stop().await;
            info!("Engine shut down");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .await
            .as_ref()
            .is_some_and(SweeperHandle::is_running)
    }
}
