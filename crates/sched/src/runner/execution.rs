//! The worker loop and per-invocation wrap-up.
//!
//! The entry-point routine always executes outside the scheduler lock:
//! the lock is dropped before invocation and reacquired to report the
//! outcome. This is the discipline that keeps caller-supplied work from
//! deadlocking the scheduler.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use takt_core::SchedError;
use tracing::{debug, warn};

use crate::pool::SlotState;
use crate::runner::core::{SchedInner, SchedState};
use crate::types::{Handle, TaskId, TaskOutcome, WorkRoutine};

/// What one scheduling step accomplished.
pub(crate) enum StepOutcome {
    /// An entry point was invoked; the handle feeds the continuity
    /// preference of the next `select_next`.
    Ran(Handle),
    /// No ready task was found.
    Idle,
}

/// One full scheduling step: select, claim, invoke outside the lock,
/// wrap up. Shared by the worker threads and the single-thread pump.
pub(crate) fn run_one(inner: &SchedInner, worker_id: usize, prev: Option<Handle>) -> StepOutcome {
    let hw_now = inner.hw_events.load(Ordering::Acquire);

    let mut guard = inner.state.lock().unwrap();
    let Some(id) = guard.select_next(&inner.config, hw_now, worker_id, prev) else {
        return StepOutcome::Idle;
    };
    let dispatch = guard.claim(id, hw_now);
    drop(guard);

    let started = Instant::now();
    let outcome = dispatch.routine.run(&dispatch.ctx);
    let elapsed = started.elapsed();

    let mut guard = inner.state.lock().unwrap();
    let callbacks = guard.on_complete(inner, id, dispatch.thread_slot, outcome, elapsed);
    drop(guard);

    // free-resources callbacks run outside the lock, like the routine
    for callback in callbacks {
        callback.free_resources();
    }
    StepOutcome::Ran(dispatch.handle)
}

/// Long-lived worker body. Parks on the new-work condvar when idle,
/// rechecking the shutdown flag at the configured interval.
pub(crate) fn worker_loop(inner: Arc<SchedInner>, worker_id: usize) {
    debug!(worker_id, "worker online");
    let mut prev: Option<Handle> = None;
    while !inner.shutdown.load(Ordering::Acquire) {
        match run_one(&inner, worker_id, prev.take()) {
            StepOutcome::Ran(handle) => prev = Some(handle),
            StepOutcome::Idle => {
                let guard = inner.state.lock().unwrap();
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                let _ = inner
                    .new_work
                    .wait_timeout(guard, inner.config.idle_park())
                    .unwrap();
            }
        }
    }
    debug!(worker_id, "worker offline");
}

impl SchedState {
    /// Report one invocation's outcome. Must be called with the
    /// scheduler lock held; returns the routines whose free-resources
    /// callback the caller must invoke after releasing it.
    pub fn on_complete(
        &mut self,
        inner: &SchedInner,
        id: TaskId,
        thread_slot: u32,
        outcome: TaskOutcome,
        elapsed: Duration,
    ) -> Vec<Arc<dyn WorkRoutine>> {
        let now = Instant::now();
        let priority = self.pool.slot(id).item.as_ref().map(|i| i.priority);
        if let Some(priority) = priority {
            self.fairness.add(priority, elapsed, now);
            self.metrics.record_invocation(priority, elapsed);
        }

        let slot = self.pool.slot_mut(id);
        slot.occupancy = slot.occupancy.saturating_sub(1);
        slot.thread_mask &= !(1u64 << thread_slot);
        slot.busy_time += elapsed;

        match outcome {
            TaskOutcome::NeedContinue => {
                // loops back to the ready set for its next invocation
                inner.new_work.notify_all();
            }
            TaskOutcome::Busy => {
                slot.waiting = true;
                slot.last_poll = Some(now);
                self.metrics.busy_polls += 1;
            }
            TaskOutcome::Done => {
                // failure reported by a sibling INTER instance wins
                if slot.result.is_none() {
                    slot.result = Some(Ok(()));
                }
            }
            TaskOutcome::Failed(err) => {
                slot.result = Some(Err(err));
            }
        }

        let mut callbacks = Vec::new();
        let (occupancy, result) = {
            let slot = self.pool.slot(id);
            (slot.occupancy, slot.result)
        };
        if occupancy == 0 {
            match result {
                Some(Ok(())) => {
                    callbacks.extend(self.finish_success(id));
                    inner.free_slot.notify_all();
                    inner.new_work.notify_all();
                }
                Some(Err(err)) => {
                    warn!(task = id, ?err, "task failed");
                    callbacks = self.fail_task_cascade(id, err);
                    inner.free_slot.notify_all();
                    inner.new_work.notify_all();
                }
                None => {}
            }
        }
        self.refresh_pending();
        callbacks
    }

    /// Terminal wrap-up of a successful job: clear its dependency-table
    /// outputs, unblock dependents and INTRA successors, release the
    /// occupancy entry and broadcast to waiters.
    pub fn finish_success(&mut self, id: TaskId) -> Option<Arc<dyn WorkRoutine>> {
        let slot = self.pool.slot_mut(id);
        let item = slot.item.as_ref().unwrap();
        let (priority, task_type) = (item.priority, item.task_type);
        let callback = Arc::clone(&item.routine);
        slot.state = SlotState::Done;
        let successors = std::mem::take(&mut slot.successors);
        let occ_idx = slot.occ_index.take();
        slot.completed.notify_all();

        self.queues.remove(priority, task_type, id);
        if let Some(occ_idx) = occ_idx {
            self.occupancy.release(occ_idx);
        }

        let mut unblocked = self.deps.complete_outputs(id, None);
        unblocked.extend(successors);
        for handle in unblocked {
            if let Some(dep) = self.pool.resolve_mut(handle) {
                if !dep.is_terminal() {
                    dep.unresolved = dep.unresolved.saturating_sub(1);
                }
            }
        }

        self.metrics.record_completed();
        debug!(task = id, busy_time = ?self.pool.slot(id).busy_time, "task done");
        Some(callback)
    }

    /// Terminal wrap-up of a failed job, propagating the status
    /// transitively: every dependent (and INTRA successor) inherits the
    /// failure without its entry point ever running. Returns the
    /// free-resources callbacks owed to tasks that did run.
    pub fn fail_task_cascade(&mut self, id: TaskId, err: SchedError) -> Vec<Arc<dyn WorkRoutine>> {
        let mut callbacks = Vec::new();
        let mut worklist: Vec<(TaskId, SchedError)> = vec![(id, err)];

        while let Some((tid, err)) = worklist.pop() {
            let slot = self.pool.slot_mut(tid);
            if slot.is_terminal() || slot.item.is_none() {
                continue;
            }
            let handle = slot.handle(tid);
            let item = slot.item.as_ref().unwrap();
            let (priority, task_type, owner) = (item.priority, item.task_type, item.owner);
            if slot.calls > 0 {
                callbacks.push(Arc::clone(&item.routine));
            }
            slot.state = SlotState::Failed(err);
            slot.result = Some(Err(err));
            let successors = std::mem::take(&mut slot.successors);
            let occ_idx = slot.occ_index.take();
            slot.completed.notify_all();

            self.queues.remove(priority, task_type, tid);
            if let Some(occ_idx) = occ_idx {
                self.occupancy.release(occ_idx);
            }
            self.pool.record_failed(handle, owner, err);
            self.metrics.record_failed();

            for dependent in self.deps.complete_outputs(tid, Some(err)) {
                if self.pool.resolve(dependent).is_some() {
                    worklist.push((dependent.task, err));
                }
            }
            for successor in successors {
                if self.pool.resolve(successor).is_some() {
                    worklist.push((successor.task, err));
                }
            }
        }
        callbacks
    }
}
