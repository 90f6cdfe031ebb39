//! Ready-task selection: the two-pass priority scan, per-policy
//! readiness gates and the dispatch claim.

use std::sync::Arc;
use std::time::Instant;

use takt_core::SchedulerConfig;

use crate::runner::core::SchedState;
use crate::types::{
    CallContext, Handle, OwnerId, Priority, TaskId, TaskType, ThreadingPolicy, WorkRoutine,
};

/// Everything the executor needs to invoke one entry point outside the
/// scheduler lock.
pub(crate) struct Dispatch {
    pub handle: Handle,
    pub routine: Arc<dyn WorkRoutine>,
    pub ctx: CallContext,
    pub thread_slot: u32,
}

/// Worker 0 serves software tasks first (and is the only worker allowed
/// to take DEDICATED ones); the remaining workers scan hardware first.
fn type_order(worker_id: usize) -> [TaskType; 2] {
    if worker_id == 0 {
        [TaskType::Software, TaskType::Hardware]
    } else {
        [TaskType::Hardware, TaskType::Software]
    }
}

/// First unclaimed bit of `mask` below `width`.
fn free_thread_slot(mask: u64, width: u32) -> Option<u32> {
    (0..width.min(64)).find(|bit| mask & (1u64 << bit) == 0)
}

impl SchedState {
    /// Pick the next task for `worker_id`.
    ///
    /// Prefers re-running `prev` (the task this worker just executed)
    /// to reduce cross-thread thrashing. Otherwise scans priorities
    /// high to low twice: the first pass skips classes that exceeded
    /// their fairness budget, the second considers everything so
    /// budget starvation can never stall the pool.
    pub fn select_next(
        &mut self,
        config: &SchedulerConfig,
        hw_now: u64,
        worker_id: usize,
        prev: Option<Handle>,
    ) -> Option<TaskId> {
        let now = Instant::now();

        if let Some(handle) = prev {
            if self.pool.resolve(handle).is_some()
                && self.is_ready(handle.task, config, hw_now, worker_id, now)
            {
                return Some(handle.task);
            }
        }

        let stat = self.fairness.snapshot(now);
        for respect_budget in [true, false] {
            for priority in Priority::ALL {
                if respect_budget && !stat.within_budget(priority, &config.priority_ratios) {
                    continue;
                }
                for task_type in type_order(worker_id) {
                    for &id in self.queues.bucket(priority, task_type) {
                        if self.is_ready(id, config, hw_now, worker_id, now) {
                            return Some(id);
                        }
                    }
                }
            }
        }
        None
    }

    /// All gates a task must pass before a worker may enter it.
    pub fn is_ready(
        &self,
        id: TaskId,
        config: &SchedulerConfig,
        hw_now: u64,
        worker_id: usize,
        now: Instant,
    ) -> bool {
        let slot = self.pool.slot(id);
        if !slot.is_runnable() || slot.unresolved > 0 {
            return false;
        }
        let Some(item) = slot.item.as_ref() else {
            return false;
        };

        // Cooldown after a "not ready" poll: retried only once the
        // interval elapses or a new hardware event has been observed.
        if slot.waiting {
            let cooled = slot
                .last_poll
                .is_none_or(|at| now.duration_since(at) >= config.wait_cooldown());
            if !cooled && hw_now == slot.hw_event_seen {
                return false;
            }
        }

        match item.policy {
            ThreadingPolicy::Dedicated => worker_id == 0 && slot.occupancy == 0,
            ThreadingPolicy::Intra | ThreadingPolicy::Wait => slot.occupancy == 0,
            ThreadingPolicy::Inter => {
                slot.occupancy < item.thread_count
                    && free_thread_slot(slot.thread_mask, item.thread_count).is_some()
            }
        }
    }

    /// Mark `id` occupied and hand back what the executor needs to run
    /// it outside the lock.
    pub fn claim(&mut self, id: TaskId, hw_now: u64) -> Dispatch {
        let slot = self.pool.slot_mut(id);
        let item = slot.item.as_ref().unwrap();
        let thread_slot = match item.policy {
            ThreadingPolicy::Inter => {
                free_thread_slot(slot.thread_mask, item.thread_count).unwrap_or(0)
            }
            _ => 0,
        };
        let routine = Arc::clone(&item.routine);
        let handle = slot.handle(id);

        slot.occupancy += 1;
        slot.thread_mask |= 1u64 << thread_slot;
        slot.calls += 1;
        slot.hw_event_seen = hw_now;
        slot.waiting = false;

        Dispatch {
            handle,
            routine,
            ctx: CallContext { call: slot.calls, thread_slot },
            thread_slot,
        }
    }

    /// Clear the poll cooldown for every pending task of `owner`,
    /// letting workers retry them immediately.
    pub fn clear_waiting_for(&mut self, owner: OwnerId) {
        let ids: Vec<TaskId> = self.pool.active_ids().collect();
        for id in ids {
            let slot = self.pool.slot_mut(id);
            if slot.item.as_ref().is_some_and(|i| i.owner == owner) {
                slot.waiting = false;
                slot.last_poll = None;
            }
        }
    }

    /// Highest-priority still-pending task tagged with `owner`, ties
    /// broken by slot order (submission order within one priority).
    pub fn highest_pending_for(&self, owner: OwnerId) -> Option<Handle> {
        let mut best: Option<(Priority, Handle)> = None;
        for id in self.pool.active_ids() {
            let slot = self.pool.slot(id);
            let Some(item) = slot.item.as_ref() else { continue };
            if item.owner != owner {
                continue;
            }
            if best.is_none_or(|(p, _)| item.priority < p) {
                best = Some((item.priority, slot.handle(id)));
            }
        }
        best.map(|(_, handle)| handle)
    }
}
