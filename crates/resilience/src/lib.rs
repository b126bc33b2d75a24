//! Resilience primitives that wrap every physical call to the external
//! service.
//!
//! A call passes through them in a fixed order:
//!
//! ```text
//! breaker.execute → limiter.acquire → dedup.dedupe → client.execute
//! ```
//!
//! - [`CircuitBreaker`]: fails fast while the target is unhealthy
//! - [`RateLimiter`]: token bucket that waits rather than rejects
//! - [`RequestDeduplicator`]: single-flight plus a short reuse window

pub mod circuit_breaker;
pub mod dedup;
pub mod rate_limiter;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use dedup::{Deduped, Origin, RequestDeduplicator};
pub use rate_limiter::{CostTable, RateLimiter};
