//! Task store: durable handles for background work.
//!
//! A Task outlives the connection that created it. Agents poll it, watch its
//! progress, and cancel it cooperatively. Terminal Tasks are evicted a TTL
//! after they finish by a periodic sweep.

pub mod job;
pub mod runner;
pub mod store;

pub use job::{BatchJob, BatchJobReport};
pub use runner::TaskContext;
pub use store::{SweeperHandle, Task, TaskFailure, TaskState, TaskStore};
