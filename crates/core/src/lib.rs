//! # SheetGate Core
//!
//! Domain types, traits, and error definitions for the SheetGate operation
//! engine. This crate has **zero framework dependencies**: it defines the
//! model every other crate works against.
//!
//! ## Layout
//!
//! - [`intent`]: logical operations issued by tool handlers
//! - [`call`]: physical batch calls, fragments and replies
//! - [`client`]: the external service abstraction
//! - [`range`] / [`value`] / [`snapshot`]: the minimal spreadsheet vocabulary
//!   the engine needs to batch, attribute and diff
//! - [`error`]: the error taxonomy shared by every layer

pub mod call;
pub mod client;
pub mod error;
pub mod intent;
pub mod range;
pub mod snapshot;
pub mod value;

// Re-export key types at crate root for ergonomics
pub use call::{
    BatchReply, Fragment, FragmentOp, FragmentReply, FragmentType, PhysicalCall, RangeFormat,
    RangeValues, UpdateSummary,
};
pub use client::{ClientCapabilities, SheetsClient};
pub use error::{Error, ErrorKind, ExternalError, Result, TaskError};
pub use intent::{ContainerId, IdempotencyKey, Intent, IntentKind};
pub use range::A1Range;
pub use snapshot::{CellRef, FORMATS_PROPERTY, SHEETS_PROPERTY, Snapshot};
pub use value::{CellValue, Grid};
