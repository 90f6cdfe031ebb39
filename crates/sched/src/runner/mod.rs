//! Scheduler runner -- the worker pool and its scheduling loop.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, admission (`add_task`) and lifecycle
//! - `scheduling`: two-pass selection, readiness gates and dispatch
//! - `execution`: worker loop, entry-point invocation and wrap-up

pub(crate) mod core;
pub(crate) mod execution;
mod scheduling;

pub use self::core::Scheduler;
