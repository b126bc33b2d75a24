//! Three-state circuit breaker around calls to one external target.
//!
//! - **Closed**: calls pass. Transient failures are counted inside a sliding
//!   window; reaching the threshold opens the breaker.
//! - **Open**: calls are rejected immediately with [`Error::BreakerOpen`]
//!   until `reset_timeout` has elapsed since the last failure.
//! - **HalfOpen**: exactly one probe call is admitted. Success closes the
//!   breaker, a transient failure reopens it. Concurrent callers are rejected
//!   while the probe is in flight.
//!
//! Permanent errors (4xx-equivalents) pass through untouched: the service
//! answered, so they say nothing about its health.

use serde::Serialize;
use crate::dedup::Origin;
use sheetgate_config::BreakerConfig;
use sheetgate_core::Error;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker state as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A point-in-time view for diagnostics and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: BreakerState,
    pub failures_in_window: usize,
    /// How long until an open breaker admits a probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time left before an open breaker may half-open.
    fn remaining(&self, now: Instant, reset_timeout: Duration) -> Duration {
        match self.last_failure {
            Some(at) => (at + reset_timeout).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.failures.clear();
        self.last_failure = None;
        self.probe_in_flight = false;
    }
}

/// Per-target circuit breaker.
pub struct CircuitBreaker {
    target: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    window: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        target: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        window: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            window,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn from_config(target: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(
            target,
            config.failure_threshold,
            config.reset_timeout(),
            config.window(),
        )
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An open breaker whose timeout has elapsed reports
    /// `HalfOpen`.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        inner.prune(now, self.window);
        let retry_after_ms = (inner.state == BreakerState::Open)
            .then(|| inner.remaining(now, self.reset_timeout).as_millis() as u64);
        BreakerSnapshot {
            target: self.target.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len(),
            retry_after_ms,
        }
    }

    /// Force the breaker closed and forget recorded failures.
    pub fn reset(&self) {
        self.lock().close();
        info!(target_name = %self.target, "Circuit breaker reset");
    }

    /// Run `f` under breaker protection.
    ///
    /// Returns [`Error::BreakerOpen`] without invoking `f` when the breaker
    /// is open, or half-open with a probe already in flight.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.execute_attributed(|| async { (f().await, Origin::Executed) })
            .await
    }

    /// Like [`execute`](Self::execute) for work that may hand back another
    /// caller's outcome. Only [`Origin::Executed`] outcomes count toward
    /// breaker health; a shared outcome releases the admission untouched.
    pub async fn execute_attributed<T, F, Fut>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (Result<T, Error>, Origin)>,
    {
        let admission = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let (result, origin) = f().await;

        match origin {
            Origin::Executed => {
                guard.armed = false;
                self.record(admission, &result);
            }
            Origin::Shared => {
                debug!(target_name = %self.target, "Shared outcome not recorded");
            }
        }
        result
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open && inner.remaining(now, self.reset_timeout).is_zero() {
            inner.state = BreakerState::HalfOpen;
            inner.probe_in_flight = false;
            info!(target_name = %self.target, "Circuit breaker half-open");
        }
    }

    fn admit(&self) -> Result<Admission, Error> {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => Err(Error::BreakerOpen {
                target: self.target.clone(),
                retry_after: inner.remaining(now, self.reset_timeout),
            }),
            BreakerState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                debug!(target_name = %self.target, "Admitting probe call");
                Ok(Admission::Probe)
            }
            BreakerState::HalfOpen => Err(Error::BreakerOpen {
                target: self.target.clone(),
                retry_after: self.reset_timeout,
            }),
        }
    }

    fn record<T>(&self, admission: Admission, result: &Result<T, Error>) {
        let now = Instant::now();
        let failed = matches!(result, Err(e) if e.counts_as_breaker_failure());
        let mut inner = self.lock();

        match admission {
            Admission::Probe => {
                if failed {
                    inner.state = BreakerState::Open;
                    inner.last_failure = Some(now);
                    inner.probe_in_flight = false;
                    warn!(target_name = %self.target, "Probe failed, circuit breaker re-opened");
                } else {
                    inner.close();
                    info!(target_name = %self.target, "Probe succeeded, circuit breaker closed");
                }
            }
            Admission::Normal => {
                // Outcomes of calls admitted before a trip do not extend it.
                if !failed || inner.state != BreakerState::Closed {
                    return;
                }
                inner.failures.push_back(now);
                inner.last_failure = Some(now);
                inner.prune(now, self.window);
                let count = inner.failures.len();
                if count >= self.failure_threshold as usize {
                    inner.state = BreakerState::Open;
                    warn!(
                        target_name = %self.target,
                        failures = count,
                        reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                } else {
                    debug!(target_name = %self.target, failures = count, "Recorded breaker failure");
                }
            }
        }
    }
}

/// Releases the probe slot if the probe future is dropped before settling.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.lock();
            if inner.state == BreakerState::HalfOpen {
                inner.probe_in_flight = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgate_core::ExternalError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            threshold,
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }

    async fn fail_transient(b: &CircuitBreaker) -> Result<(), Error> {
        b.execute(|| async { Err::<(), _>(ExternalError::transient("503").into()) })
            .await
    }

    async fn trip(b: &CircuitBreaker, threshold: u32) {
        for _ in 0..threshold {
            let _ = fail_transient(b).await;
        }
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_without_calling() {
        let b = breaker(3);
        trip(&b, 3).await;

        let calls = AtomicUsize::new(0);
        let result = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            })
            .await;

        assert!(matches!(result, Err(Error::BreakerOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let err = result.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_failures_are_not_counted() {
        let b = breaker(2);
        for _ in 0..3 {
            let result = b
                .execute_attributed(|| async {
                    (Err::<(), _>(ExternalError::transient("503").into()), Origin::Shared)
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().failures_in_window, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_outcome_releases_the_probe_slot() {
        let b = breaker(1);
        trip(&b, 1).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        let shared = b
            .execute_attributed(|| async { (Ok::<_, Error>(()), Origin::Shared) })
            .await;
        assert!(shared.is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_do_not_trip() {
        let b = breaker(2);
        for _ in 0..10 {
            let r = b
                .execute(|| async { Err::<(), _>(ExternalError::permanent("bad range").into()) })
                .await;
            assert!(matches!(r, Err(Error::External(ExternalError::Permanent { .. }))));
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_are_forgotten() {
        let b = CircuitBreaker::new("test", 3, Duration::from_secs(30), Duration::from_secs(1));
        let _ = fail_transient(&b).await;
        let _ = fail_transient(&b).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        let _ = fail_transient(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().failures_in_window, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_retry_after_while_open() {
        let b = breaker(1);
        trip(&b, 1).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        match fail_transient(&b).await {
            Err(Error::BreakerOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(20));
            }
            other => panic!("expected BreakerOpen, got {other:?}"),
        }
        assert_eq!(b.snapshot().retry_after_ms, Some(20_000));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_probe_closes() {
        let b = breaker(2);
        trip(&b, 2).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        let r = b.execute(|| async { Ok::<_, Error>(7) }).await;
        assert_eq!(r.unwrap(), 7);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().failures_in_window, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let b = breaker(2);
        trip(&b, 2).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let r = fail_transient(&b).await;
        assert!(matches!(r, Err(Error::External(_))));
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(
            b.execute(|| async { Ok::<_, Error>(()) }).await,
            Err(Error::BreakerOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_on_probe_closes() {
        let b = breaker(1);
        trip(&b, 1).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = b
            .execute(|| async { Err::<(), _>(ExternalError::permanent("not found").into()) })
            .await;
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_probe_in_flight() {
        let b = breaker(1);
        trip(&b, 1).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let probe = b.execute(|| async move {
            let _ = rx.await;
            Ok::<_, Error>(1)
        });
        let b_ref = &b;
        let contender = async move {
            tokio::task::yield_now().await;
            let r = b_ref.execute(|| async { Ok::<_, Error>(2) }).await;
            let _ = tx.send(());
            r
        };

        let (p, c) = tokio::join!(probe, contender);
        assert_eq!(p.unwrap(), 1);
        assert!(matches!(c, Err(Error::BreakerOpen { .. })));
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_releases_slot() {
        let b = breaker(1);
        trip(&b, 1).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            b.execute(|| std::future::pending::<Result<(), Error>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reset() {
        let b = breaker(1);
        trip(&b, 1).await;
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
