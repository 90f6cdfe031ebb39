//! Priority-fair, dependency-aware task scheduler for codec middleware.
//!
//! Multiplexes opaque hardware and software work items (encode/decode/
//! VPP stages) across a bounded worker-thread pool behind a handle-based
//! synchronous wait API. Tasks carry a priority class, a hardware/
//! software type, a threading policy and up to four source/destination
//! dependency resources; completion (or failure) flows through the
//! dependency table to unblock or fail dependents.
//!
//! The scheduler never interprets the work: entry points are invoked
//! outside the scheduler lock and report [`TaskOutcome`]s verbatim.

mod deps;
mod fairness;
pub mod metrics;
mod occupancy;
mod pool;
mod queues;
pub mod runner;
mod sync;
pub mod types;

pub use metrics::SchedulerMetrics;
pub use pool::FailedRecord;
pub use runner::Scheduler;
pub use takt_core::{SchedError, SchedResult, SchedulerConfig};
pub use types::{
    CallContext, Handle, OwnerId, Priority, ResourceId, TaskOutcome, TaskState, TaskType,
    ThreadingPolicy, WorkIdentity, WorkItem, WorkRoutine, MAX_DEPENDENCIES,
};
