//! Token-bucket rate limiter guarding the external quota.
//!
//! Refill is computed lazily from elapsed time whenever the bucket is touched;
//! there is no background timer. `acquire` never fails, it only waits. Waiters
//! are served in arrival order because the bucket lock is held while sleeping.

use sheetgate_config::{CostTableConfig, RateLimitConfig};
use sheetgate_core::{FragmentType, PhysicalCall};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Float slack when comparing token balances.
const EPSILON: f64 = 1e-9;

/// Shortest sleep between refill checks.
const MIN_WAIT: Duration = Duration::from_millis(1);
/// Longest single sleep; the bucket is re-checked after each one.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Token cost per physical call class. Supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTable {
    pub read: f64,
    pub write: f64,
    pub batch: f64,
}

impl CostTable {
    /// Price a physical call: `batch` when it carries more than one
    /// fragment, otherwise `read` or `write` by fragment type.
    pub fn cost_of(&self, call: &PhysicalCall) -> f64 {
        match call.fragments.as_slice() {
            [] => 0.0,
            [single] if single.op.fragment_type() == FragmentType::ValuesGet => self.read,
            [_] => self.write,
            _ => self.batch,
        }
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self::from(&CostTableConfig::default())
    }
}

impl From<&CostTableConfig> for CostTable {
    fn from(config: &CostTableConfig) -> Self {
        Self {
            read: config.read,
            write: config.write,
            batch: config.batch,
        }
    }
}

/// Current balance and when it was last brought up to date.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).clamp(0.0, capacity);
        self.last_refill = now;
    }
}

/// A rolling token bucket, one per external-client target.
pub struct RateLimiter {
    target: String,
    capacity: f64,
    refill_per_sec: f64,
    costs: CostTable,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket.
    pub fn new(target: impl Into<String>, capacity: f64, refill_per_sec: f64, costs: CostTable) -> Self {
        Self {
            target: target.into(),
            capacity,
            refill_per_sec,
            costs,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(target: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self::new(
            target,
            config.max_tokens,
            config.refill_rate_per_second,
            CostTable::from(&config.cost_table),
        )
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    /// Wait until `cost` tokens are available, then debit them.
    ///
    /// A cost above capacity is clamped to capacity so it can always be met.
    pub async fn acquire(&self, cost: f64) {
        let cost = if cost.is_finite() {
            cost.clamp(0.0, self.capacity)
        } else {
            self.capacity
        };

        let mut bucket = self.bucket.lock().await;
        loop {
            bucket.refill(Instant::now(), self.capacity, self.refill_per_sec);
            if bucket.tokens + EPSILON >= cost {
                bucket.tokens = (bucket.tokens - cost).max(0.0);
                return;
            }

            let deficit = cost - bucket.tokens;
            let wait = Duration::try_from_secs_f64(deficit / self.refill_per_sec)
                .unwrap_or(MAX_WAIT)
                .clamp(MIN_WAIT, MAX_WAIT);
            debug!(
                target_name = %self.target,
                cost,
                available = bucket.tokens,
                wait_ms = wait.as_millis() as u64,
                "Rate limit: waiting for refill"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Debit the price of a physical call from the cost table.
    pub async fn acquire_for(&self, call: &PhysicalCall) {
        self.acquire(self.costs.cost_of(call)).await;
    }

    /// The current balance after lazy refill.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now(), self.capacity, self.refill_per_sec);
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgate_core::{ContainerId, Fragment, FragmentOp};
    use std::sync::Arc;

    fn limiter(capacity: f64, rate: f64) -> RateLimiter {
        RateLimiter::new("test", capacity, rate, CostTable::default())
    }

    fn call(ops: Vec<FragmentOp>) -> PhysicalCall {
        PhysicalCall {
            container: ContainerId::new("s"),
            fragments: ops
                .into_iter()
                .map(|op| Fragment { op, intents: vec![0] })
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_full_and_debits() {
        let rl = limiter(10.0, 1.0);
        assert_eq!(rl.available().await, 10.0);
        rl.acquire(4.0).await;
        assert!((rl.available().await - 6.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_refill_instead_of_rejecting() {
        let rl = limiter(2.0, 1.0);
        rl.acquire(2.0).await;

        let start = Instant::now();
        rl.acquire(1.0).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(rl.available().await < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_refill_rate_keeps_waiting() {
        let rl = limiter(2.0, 0.0);
        rl.acquire(2.0).await;

        let pending = tokio::time::timeout(Duration::from_secs(300), rl.acquire(1.0)).await;
        assert!(pending.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let rl = limiter(5.0, 2.0);
        rl.acquire(5.0).await;
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(rl.available().await, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_stay_within_bounds() {
        let rl = limiter(3.0, 1.5);
        let costs = [1.0, 0.5, 3.0, 2.0, 0.0, 7.0, 1.25];
        for (i, cost) in costs.iter().enumerate() {
            rl.acquire(*cost).await;
            let tokens = rl.available().await;
            assert!((0.0..=3.0).contains(&tokens), "step {i}: {tokens}");
            tokio::time::advance(Duration::from_millis(300 * i as u64)).await;
            let tokens = rl.available().await;
            assert!((0.0..=3.0).contains(&tokens), "step {i} after advance: {tokens}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cost_above_capacity_is_clamped() {
        let rl = limiter(2.0, 1.0);
        rl.acquire(50.0).await;
        assert!(rl.available().await < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_are_serialized() {
        let rl = Arc::new(limiter(1.0, 1.0));
        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let rl = rl.clone();
                tokio::spawn(async move { rl.acquire(1.0).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        // One token up front, two more at 1 token/s.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn cost_table_prices_calls() {
        let costs = CostTable {
            read: 1.0,
            write: 2.0,
            batch: 5.0,
        };
        let get = FragmentOp::ValuesGet {
            ranges: vec!["A1".parse().unwrap()],
        };
        let clear = FragmentOp::ValuesClear {
            ranges: vec!["A1".parse().unwrap()],
        };
        assert_eq!(costs.cost_of(&call(vec![])), 0.0);
        assert_eq!(costs.cost_of(&call(vec![get.clone()])), 1.0);
        assert_eq!(costs.cost_of(&call(vec![clear.clone()])), 2.0);
        assert_eq!(costs.cost_of(&call(vec![get, clear])), 5.0);
    }
}
