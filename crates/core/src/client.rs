//! External client trait: the abstraction over the spreadsheet service.
//!
//! The engine receives an already-authenticated handle. Token refresh,
//! credentials and transport live behind this trait and are not the engine's
//! concern.

use crate::call::{BatchReply, PhysicalCall};
use crate::error::ExternalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the service can tell us about a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Whether a batch reply reports success or failure per fragment.
    /// When false, any fragment failure is treated as a failure of the
    /// whole call.
    pub per_fragment_outcomes: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            per_fragment_outcomes: true,
        }
    }
}

/// The core client trait.
///
/// One implementation per external target. The engine keeps one rate limiter
/// and one circuit breaker per `name()`.
#[async_trait]
pub trait SheetsClient: Send + Sync {
    /// A stable name for this target (e.g., "google-sheets").
    fn name(&self) -> &str;

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities::default()
    }

    /// Submit one physical batch call.
    ///
    /// `Err` means the whole call failed. `Ok` may still carry per-fragment
    /// failures when [`ClientCapabilities::per_fragment_outcomes`] is set.
    async fn execute(&self, call: &PhysicalCall) -> Result<BatchReply, ExternalError>;
}
