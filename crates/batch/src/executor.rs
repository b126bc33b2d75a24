//! Batch execution and reply demultiplexing.
//!
//! Each physical call runs through the resilience pipeline in a fixed order:
//! breaker admission, then the rate limiter, then the deduplicator, then the
//! client. Calls for different containers run concurrently. Replies are
//! attributed back to Intents positionally, so a mutation's result carries
//! the service's own metadata and no read-back is needed.

use crate::compiler::{CompiledBatch, compile};
use crate::key;
use serde::Serialize;
use sheetgate_core::{
    A1Range, BatchReply, Error, ErrorKind, ExternalError, FragmentOp, FragmentReply, Grid, Intent,
    PhysicalCall, SheetsClient, UpdateSummary,
};
use sheetgate_resilience::{CircuitBreaker, Origin, RateLimiter, RequestDeduplicator};
use std::sync::Arc;
use tracing::{info, warn};

/// What a successful Intent produced, taken from its fragment's reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentOutput {
    Values { range: A1Range, values: Grid },
    Updated(UpdateSummary),
    Appended(UpdateSummary),
    Cleared { range: A1Range },
    Formatted { range: A1Range },
    SheetAdded { sheet_id: u64, title: String },
    SheetDeleted { title: String },
}

/// Why an Intent failed, and where in the batch it was.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentFailure {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
    /// Index into the submitted Intent list.
    pub intent: usize,
    /// Index of the physical call in the compiled batch.
    pub call: usize,
    /// Index of the fragment inside that call.
    pub fragment: usize,
}

impl IntentFailure {
    fn new(error: &Error, intent: usize, call: usize, fragment: usize) -> Self {
        Self {
            kind: error.kind(),
            retryable: error.is_retryable(),
            message: error.to_string(),
            intent,
            call,
            fragment,
        }
    }
}

/// The resolution of one Intent. Results are index-aligned with the input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentResult {
    pub index: usize,
    pub call: usize,
    pub fragment: usize,
    pub outcome: Result<IntentOutput, IntentFailure>,
}

impl IntentResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs compiled batches against one external client target.
///
/// Cheap to clone; the limiter, breaker and deduplicator are shared with
/// every clone.
#[derive(Clone)]
pub struct BatchExecutor {
    client: Arc<dyn SheetsClient>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    dedup: Arc<RequestDeduplicator<BatchReply>>,
    per_fragment_outcomes: bool,
}

impl BatchExecutor {
    pub fn new(
        client: Arc<dyn SheetsClient>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        dedup: Arc<RequestDeduplicator<BatchReply>>,
    ) -> Self {
        Self {
            client,
            breaker,
            limiter,
            dedup,
            per_fragment_outcomes: true,
        }
    }

    /// Treat any fragment failure as a failure of the whole call, even when
    /// the client reports outcomes per fragment.
    pub fn with_per_fragment_outcomes(mut self, enabled: bool) -> Self {
        self.per_fragment_outcomes = enabled;
        self
    }

    pub fn client(&self) -> &Arc<dyn SheetsClient> {
        &self.client
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Compile and execute in one step.
    pub async fn execute(&self, intents: &[Intent]) -> Vec<IntentResult> {
        let batch = compile(intents);
        self.execute_compiled(&batch).await
    }

    /// Execute a batch produced by [`compile`]. An empty batch makes no calls.
    pub async fn execute_compiled(&self, batch: &CompiledBatch) -> Vec<IntentResult> {
        if batch.is_empty() {
            return Vec::new();
        }

        let per_call = futures::future::join_all(
            batch
                .calls
                .iter()
                .enumerate()
                .map(|(index, call)| self.run_call(index, call)),
        )
        .await;

        let mut slots: Vec<Option<IntentResult>> = vec![None; batch.intent_count];
        for result in per_call.into_iter().flatten() {
            if let Some(slot) = slots.get_mut(result.index) {
                *slot = Some(result);
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let error = Error::Internal(format!("intent {index} was not compiled into any call"));
                    IntentResult {
                        index,
                        call: 0,
                        fragment: 0,
                        outcome: Err(IntentFailure::new(&error, index, 0, 0)),
                    }
                })
            })
            .collect()
    }

    async fn run_call(&self, index: usize, call: &PhysicalCall) -> Vec<IntentResult> {
        let call = key::canonicalize(call);
        let intents: usize = call.fragments.iter().map(|f| f.intents.len()).sum();
        info!(
            container = %call.container,
            call = index,
            fragments = call.fragments.len(),
            intents,
            "Submitting batch call"
        );

        match self.submit(&call).await {
            Ok(reply) => {
                let results = demux(index, &call, &reply);
                let failed = results.iter().filter(|r| !r.is_ok()).count();
                if failed > 0 {
                    warn!(container = %call.container, call = index, failed, "Batch call partially failed");
                } else {
                    info!(container = %call.container, call = index, "Batch call succeeded");
                }
                results
            }
            Err(error) => {
                warn!(
                    container = %call.container,
                    call = index,
                    error = %error,
                    retryable = error.is_retryable(),
                    "Batch call failed"
                );
                fail_all(index, &call, &error)
            }
        }
    }

    async fn submit(&self, call: &PhysicalCall) -> Result<BatchReply, Error> {
        let cost = self.limiter.costs().cost_of(call);
        let per_fragment =
            self.per_fragment_outcomes && self.client.capabilities().per_fragment_outcomes;

        let reply = self
            .breaker
            .execute_attributed(|| async {
                self.limiter.acquire(cost).await;
                if has_append(call) {
                    // Appends are not idempotent; identical ones must each run.
                    return (self.send(call, per_fragment).await, Origin::Executed);
                }
                let request_key = match key::request_key(call) {
                    Ok(request_key) => request_key,
                    Err(error) => return (Err(error), Origin::Executed),
                };
                let deduped = self
                    .dedup
                    .dedupe_tracked(&request_key, self.dedup.default_ttl(), || {
                        self.send(call, per_fragment)
                    })
                    .await;
                (deduped.outcome, deduped.origin)
            })
            .await;

        if reply.is_ok() && !call.is_read_only() {
            let prefix = key::container_prefix(call);
            self.dedup.invalidate(|k| k.starts_with(&prefix));
        }
        reply
    }

    async fn send(&self, call: &PhysicalCall, per_fragment: bool) -> Result<BatchReply, Error> {
        let reply = self.client.execute(call).await?;
        if !per_fragment {
            if let Some(error) = reply.first_error() {
                return Err(error.clone().into());
            }
        }
        Ok(reply)
    }
}

fn has_append(call: &PhysicalCall) -> bool {
    call.fragments
        .iter()
        .any(|f| matches!(f.op, FragmentOp::ValuesAppend { .. }))
}

fn fail_all(call_index: usize, call: &PhysicalCall, error: &Error) -> Vec<IntentResult> {
    call.fragments
        .iter()
        .enumerate()
        .flat_map(|(fragment_index, fragment)| {
            fragment.intents.iter().map(move |&intent| IntentResult {
                index: intent,
                call: call_index,
                fragment: fragment_index,
                outcome: Err(IntentFailure::new(error, intent, call_index, fragment_index)),
            })
        })
        .collect()
}

fn demux(call_index: usize, call: &PhysicalCall, reply: &BatchReply) -> Vec<IntentResult> {
    if reply.fragments.len() != call.fragments.len() {
        let error = Error::from(ExternalError::permanent(format!(
            "reply carries {} fragment outcomes for {} fragments",
            reply.fragments.len(),
            call.fragments.len()
        )));
        return fail_all(call_index, call, &error);
    }

    let mut results = Vec::new();
    for (fragment_index, (fragment, outcome)) in
        call.fragments.iter().zip(&reply.fragments).enumerate()
    {
        let outputs = match outcome {
            Ok(fragment_reply) => split_reply(&fragment.op, fragment_reply).ok_or_else(|| {
                Error::from(ExternalError::permanent(format!(
                    "fragment {fragment_index} ({:?}) reply does not match its request shape",
                    fragment.op.fragment_type()
                )))
            }),
            Err(e) => Err(Error::from(e.clone())),
        };

        match outputs {
            Ok(outputs) => {
                for (&intent, output) in fragment.intents.iter().zip(outputs) {
                    results.push(IntentResult {
                        index: intent,
                        call: call_index,
                        fragment: fragment_index,
                        outcome: Ok(output),
                    });
                }
            }
            Err(error) => {
                for &intent in &fragment.intents {
                    results.push(IntentResult {
                        index: intent,
                        call: call_index,
                        fragment: fragment_index,
                        outcome: Err(IntentFailure::new(&error, intent, call_index, fragment_index)),
                    });
                }
            }
        }
    }
    results
}

/// Split one fragment reply into per-entry outputs, or `None` when the reply
/// does not answer the request it was paired with.
fn split_reply(op: &FragmentOp, reply: &FragmentReply) -> Option<Vec<IntentOutput>> {
    if op.entry_count() != reply.entry_count() {
        return None;
    }
    let outputs = match (op, reply) {
        (FragmentOp::ValuesGet { .. }, FragmentReply::Values { ranges }) => ranges
            .iter()
            .map(|rv| IntentOutput::Values {
                range: rv.range.clone(),
                values: rv.values.clone(),
            })
            .collect(),
        (FragmentOp::ValuesUpdate { .. }, FragmentReply::Updated { responses }) => responses
            .iter()
            .cloned()
            .map(IntentOutput::Updated)
            .collect(),
        (FragmentOp::ValuesAppend { .. }, FragmentReply::Appended { update }) => {
            vec![IntentOutput::Appended(update.clone())]
        }
        (FragmentOp::ValuesClear { .. }, FragmentReply::Cleared { ranges }) => ranges
            .iter()
            .map(|range| IntentOutput::Cleared {
                range: range.clone(),
            })
            .collect(),
        (FragmentOp::Format { .. }, FragmentReply::Formatted { ranges }) => ranges
            .iter()
            .map(|range| IntentOutput::Formatted {
                range: range.clone(),
            })
            .collect(),
        (FragmentOp::AddSheet { .. }, FragmentReply::SheetAdded { sheet_id, title }) => {
            vec![IntentOutput::SheetAdded {
                sheet_id: *sheet_id,
                title: title.clone(),
            }]
        }
        (FragmentOp::DeleteSheet { .. }, FragmentReply::SheetDeleted { title }) => {
            vec![IntentOutput::SheetDeleted {
                title: title.clone(),
            }]
        }
        _ => return None,
    };
    Some(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sheetgate_core::{ClientCapabilities, RangeValues};
    use sheetgate_resilience::CostTable;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Behavior {
        Succeed,
        FailCall(ExternalError),
        FailFragment(usize, ExternalError),
        WrongShape,
    }

    /// A mock client that answers every fragment with a well-formed reply.
    struct MockClient {
        behavior: Mutex<Behavior>,
        capabilities: ClientCapabilities,
        latency: Duration,
        call_count: Mutex<usize>,
    }

    impl MockClient {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                capabilities: ClientCapabilities::default(),
                latency: Duration::ZERO,
                call_count: Mutex::new(0),
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn without_per_fragment_outcomes(mut self) -> Self {
            self.capabilities.per_fragment_outcomes = false;
            self
        }

        fn set_behavior(&self, behavior: Behavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    fn summary(range: &A1Range) -> UpdateSummary {
        UpdateSummary {
            updated_range: range.clone(),
            updated_rows: 1,
            updated_columns: 1,
            updated_cells: 1,
            values: None,
        }
    }

    fn well_formed(op: &FragmentOp) -> FragmentReply {
        match op {
            FragmentOp::ValuesGet { ranges } => FragmentReply::Values {
                ranges: ranges
                    .iter()
                    .map(|r| RangeValues {
                        range: r.clone(),
                        values: vec![vec![r.to_string().into()]],
                    })
                    .collect(),
            },
            FragmentOp::ValuesUpdate { data } => FragmentReply::Updated {
                responses: data.iter().map(|d| summary(&d.range)).collect(),
            },
            FragmentOp::ValuesAppend { range, .. } => FragmentReply::Appended {
                update: summary(range),
            },
            FragmentOp::ValuesClear { ranges } => FragmentReply::Cleared {
                ranges: ranges.clone(),
            },
            FragmentOp::Format { entries } => FragmentReply::Formatted {
                ranges: entries.iter().map(|e| e.range.clone()).collect(),
            },
            FragmentOp::AddSheet { title } => FragmentReply::SheetAdded {
                sheet_id: 7,
                title: title.clone(),
            },
            FragmentOp::DeleteSheet { title } => FragmentReply::SheetDeleted {
                title: title.clone(),
            },
        }
    }

    #[async_trait]
    impl SheetsClient for MockClient {
        fn name(&self) -> &str {
            "mock"
        }

        fn capabilities(&self) -> ClientCapabilities {
            self.capabilities
        }

        async fn execute(&self, call: &PhysicalCall) -> Result<BatchReply, ExternalError> {
            *self.call_count.lock().unwrap() += 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                Behavior::Succeed => Ok(BatchReply::all_ok(
                    call.fragments.iter().map(|f| well_formed(&f.op)).collect(),
                )),
                Behavior::FailCall(e) => Err(e),
                Behavior::FailFragment(index, e) => Ok(BatchReply {
                    fragments: call
                        .fragments
                        .iter()
                        .enumerate()
                        .map(|(i, f)| if i == index { Err(e.clone()) } else { Ok(well_formed(&f.op)) })
                        .collect(),
                }),
                Behavior::WrongShape => Ok(BatchReply::all_ok(
                    call.fragments
                        .iter()
                        .map(|_| FragmentReply::SheetDeleted {
                            title: "nope".into(),
                        })
                        .collect(),
                )),
            }
        }
    }

    fn executor(client: Arc<MockClient>) -> BatchExecutor {
        BatchExecutor::new(
            client,
            Arc::new(CircuitBreaker::new(
                "mock",
                2,
                Duration::from_secs(30),
                Duration::from_secs(60),
            )),
            Arc::new(RateLimiter::new("mock", 100.0, 10.0, CostTable::default())),
            Arc::new(RequestDeduplicator::new(Duration::from_millis(1000))),
        )
    }

    fn r(a1: &str) -> A1Range {
        a1.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn disjoint_formats_share_one_call() {
        let client = Arc::new(MockClient::new(Behavior::Succeed));
        let exec = executor(client.clone());
        let bold = json!({"bold": true});

        let results = exec
            .execute(&[
                Intent::format("s1", r("A1:A5"), bold.clone()),
                Intent::format("s1", r("B1:B5"), bold),
            ])
            .await;

        assert_eq!(client.calls(), 1);
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].outcome,
            Ok(IntentOutput::Formatted { range: r("A1:A5") })
        );
        assert_eq!(
            results[1].outcome,
            Ok(IntentOutput::Formatted { range: r("B1:B5") })
        );
        assert_eq!((results[0].fragment, results[1].fragment), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_makes_no_calls() {
        let client = Arc::new(MockClient::new(Behavior::Succeed));
        let exec = executor(client.clone());
        assert!(exec.execute(&[]).await.is_empty());
        assert_eq!(client.calls(), 0);
        assert_eq!(exec.limiter().available().await, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_intent_traverses_full_pipeline() {
        let client = Arc::new(MockClient::new(Behavior::Succeed));
        let exec = executor(client.clone());

        let results = exec.execute(&[Intent::read("s1", r("A1"))]).await;

        assert_eq!(client.calls(), 1);
        assert!(results[0].is_ok());
        assert!((exec.limiter().available().await - 99.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_index_aligned_across_containers() {
        let client = Arc::new(MockClient::new(Behavior::Succeed));
        let exec = executor(client.clone());
        let intents = vec![
            Intent::read("s1", r("A1")),
            Intent::write("s2", r("B2"), vec![vec![1i64.into()]]),
            Intent::append("s1", r("A1:B1"), vec![vec!["row".into()]]),
            Intent::add_sheet("s2", "Q3"),
            Intent::clear("s1", r("Z1")),
        ];

        let results = exec.execute(&intents).await;

        assert_eq!(client.calls(), 2);
        assert_eq!(results.len(), intents.len());
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index, i);
            assert!(result.is_ok(), "intent {i} failed: {:?}", result.outcome);
        }
        assert!(matches!(results[0].outcome, Ok(IntentOutput::Values { .. })));
        assert!(matches!(results[1].outcome, Ok(IntentOutput::Updated(_))));
        assert!(matches!(results[2].outcome, Ok(IntentOutput::Appended(_))));
        assert!(matches!(
            &results[3].outcome,
            Ok(IntentOutput::SheetAdded { title, .. }) if title == "Q3"
        ));
        assert!(matches!(results[4].outcome, Ok(IntentOutput::Cleared { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_resolves_every_intent() {
        let client = Arc::new(MockClient::new(Behavior::FailCall(ExternalError::from_status(
            503,
            "backend unavailable",
        ))));
        let exec = executor(client.clone());

        let results = exec
            .execute(&[
                Intent::write("s1", r("A1"), vec![vec![1i64.into()]]),
                Intent::clear("s1", r("C1")),
            ])
            .await;

        assert_eq!(results.len(), 2);
        for (i, result) in results.iter().enumerate() {
            let failure = result.outcome.as_ref().unwrap_err();
            assert_eq!(failure.kind, ErrorKind::TransientExternal);
            assert!(failure.retryable);
            assert_eq!(failure.intent, i);
            assert_eq!(failure.call, 0);
            assert!(failure.message.contains("backend unavailable"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_resolves_per_fragment() {
        let client = Arc::new(MockClient::new(Behavior::FailFragment(
            1,
            ExternalError::from_status(400, "no such sheet"),
        )));
        let exec = executor(client.clone());

        let results = exec
            .execute(&[
                Intent::write("s1", r("A1"), vec![vec![1i64.into()]]),
                Intent::clear("s1", r("C1")),
            ])
            .await;

        assert!(results[0].is_ok());
        let failure = results[1].outcome.as_ref().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::PermanentExternal);
        assert!(!failure.retryable);
        assert_eq!(failure.fragment, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_per_fragment_outcomes_any_error_fails_the_call() {
        let client = Arc::new(
            MockClient::new(Behavior::FailFragment(
                1,
                ExternalError::from_status(400, "no such sheet"),
            ))
            .without_per_fragment_outcomes(),
        );
        let exec = executor(client.clone());

        let results = exec
            .execute(&[
                Intent::write("s1", r("A1"), vec![vec![1i64.into()]]),
                Intent::clear("s1", r("C1")),
            ])
            .await;

        assert!(results.iter().all(|r| !r.is_ok()));
        assert!(results
            .iter()
            .all(|r| r.outcome.as_ref().unwrap_err().kind == ErrorKind::PermanentExternal));
    }

    #[tokio::test(start_paused = true)]
    async fn per_fragment_outcomes_can_be_disabled_by_caller() {
        let client = Arc::new(MockClient::new(Behavior::FailFragment(
            0,
            ExternalError::from_status(400, "bad range"),
        )));
        let exec = executor(client.clone()).with_per_fragment_outcomes(false);

        let results = exec
            .execute(&[
                Intent::write("s1", r("A1"), vec![vec![1i64.into()]]),
                Intent::clear("s1", r("C1")),
            ])
            .await;
        assert!(results.iter().all(|r| !r.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_reply_names_the_fragment() {
        let client = Arc::new(MockClient::new(Behavior::WrongShape));
        let exec = executor(client.clone());

        let results = exec
            .execute(&[Intent::format("s1", r("A1"), json!({"bold": true}))])
            .await;

        let failure = results[0].outcome.as_ref().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::PermanentExternal);
        assert!(failure.message.contains("fragment 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast() {
        let client = Arc::new(MockClient::new(Behavior::FailCall(ExternalError::transient(
            "timeout",
        ))));
        let exec = executor(client.clone());
        let intents = [Intent::write("s1", r("A1"), vec![vec![1i64.into()]])];

        exec.execute(&intents).await;
        exec.execute(&intents).await;
        assert_eq!(client.calls(), 2);

        let results = exec.execute(&intents).await;
        assert_eq!(client.calls(), 2);
        let failure = results[0].outcome.as_ref().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::BreakerOpen);
        assert!(failure.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_reads_collapse() {
        let client = Arc::new(MockClient::new(Behavior::Succeed).with_latency(Duration::from_millis(200)));
        let exec = executor(client.clone());
        let a = [Intent::read("s1", r("A1")), Intent::read("s1", r("B1"))];
        let b = [Intent::read("s1", r("B1")), Intent::read("s1", r("A1"))];

        let (ra, rb) = tokio::join!(exec.execute(&a), exec.execute(&b));

        assert_eq!(client.calls(), 1);
        // Each caller still gets its own ranges back in its own order.
        assert!(matches!(&ra[0].outcome, Ok(IntentOutput::Values { range, .. }) if *range == r("A1")));
        assert!(matches!(&rb[0].outcome, Ok(IntentOutput::Values { range, .. }) if *range == r("B1")));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shared_failure_counts_once_against_the_breaker() {
        let client = Arc::new(
            MockClient::new(Behavior::FailCall(ExternalError::transient("503")))
                .with_latency(Duration::from_millis(200)),
        );
        let exec = executor(client.clone());
        let read = [Intent::read("s1", r("A1"))];

        let (a, b, c) = tokio::join!(exec.execute(&read), exec.execute(&read), exec.execute(&read));

        assert_eq!(client.calls(), 1);
        for results in [&a, &b, &c] {
            let failure = results[0].outcome.as_ref().unwrap_err();
            assert_eq!(failure.kind, ErrorKind::TransientExternal);
        }
        let snapshot = exec.breaker().snapshot();
        assert_eq!(snapshot.state, sheetgate_resilience::BreakerState::Closed);
        assert_eq!(snapshot.failures_in_window, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_invalidate_settled_reads() {
        let client = Arc::new(MockClient::new(Behavior::Succeed));
        let exec = executor(client.clone());
        let read = [Intent::read("s1", r("A1"))];

        exec.execute(&read).await;
        exec.execute(&read).await;
        assert_eq!(client.calls(), 1);

        exec.execute(&[Intent::write("s1", r("A1"), vec![vec![2i64.into()]])])
            .await;
        exec.execute(&read).await;
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_appends_are_not_collapsed() {
        let client = Arc::new(MockClient::new(Behavior::Succeed).with_latency(Duration::from_millis(50)));
        let exec = executor(client.clone());
        let append = [Intent::append("s1", r("A1:B1"), vec![vec!["row".into()]])];

        let (a, b) = tokio::join!(exec.execute(&append), exec.execute(&append));
        assert!(a[0].is_ok() && b[0].is_ok());
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_client_succeeds_after_reset_timeout() {
        let client = Arc::new(MockClient::new(Behavior::FailCall(ExternalError::transient(
            "timeout",
        ))));
        let exec = executor(client.clone());
        let intents = [Intent::read("s1", r("A1"))];
        exec.execute(&intents).await;
        exec.execute(&intents).await;

        client.set_behavior(Behavior::Succeed);
        tokio::time::advance(Duration::from_secs(30)).await;

        let results = exec.execute(&intents).await;
        assert!(results[0].is_ok());
        assert_eq!(client.calls(), 3);
    }
}
