//! Batch compilation and execution.
//!
//! [`compile`] turns a list of Intents into the fewest physical calls that
//! preserve sequential semantics. [`BatchExecutor`] runs those calls through
//! the resilience pipeline and resolves every Intent to exactly one
//! [`IntentResult`], success or failure.
//!
//! A policy layer can call [`compile`] first, inspect the [`CompiledBatch`],
//! and only then hand it to [`BatchExecutor::execute_compiled`].

pub mod compiler;
pub mod executor;
pub mod key;

pub use compiler::{CompiledBatch, compile};
pub use executor::{BatchExecutor, IntentFailure, IntentOutput, IntentResult};
