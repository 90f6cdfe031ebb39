//! Fixed-capacity arena of reusable task records.
//!
//! Slots are allocated lazily up to the configured hard capacity and
//! reused (never freed) afterwards. Reclamation is lazy: terminal slots
//! are swept back onto the free list by [`TaskPool::collect`], which
//! runs at the head of every [`TaskPool::acquire`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use takt_core::SchedError;

use crate::types::{Handle, JobId, OwnerId, TaskId, WorkItem, JOB_ID_MAX};

/// Lifecycle of one slot. `Done`/`Failed` are terminal and survive
/// until the next garbage-collection pass so late `synchronize` callers
/// still observe the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Free,
    Active,
    Done,
    Failed(SchedError),
}

/// One reusable task record. Owned exclusively by the scheduler;
/// callers only ever hold [`Handle`]s.
pub(crate) struct TaskSlot {
    /// Current generation; 0 only before first use.
    pub job: JobId,
    pub state: SlotState,
    pub item: Option<WorkItem>,
    /// Source dependencies (declared or INTRA-chained) not yet resolved.
    pub unresolved: u32,
    /// Worker threads currently inside the entry point.
    pub occupancy: u32,
    /// Claimed thread-slot bits (INTER instances).
    pub thread_mask: u64,
    /// Entry-point invocation counter.
    pub calls: u64,
    /// Timestamp of the most recent "not ready" completion; base of the
    /// WAIT cooldown.
    pub last_poll: Option<Instant>,
    /// Accumulated entry-point execution time.
    pub busy_time: Duration,
    /// Hardware-event counter observed at the last poll.
    pub hw_event_seen: u64,
    /// Armed after a Busy outcome; cleared on dispatch or reset_waiting.
    pub waiting: bool,
    /// Outcome reported by the entry point, pending wrap-up once
    /// occupancy drains to zero.
    pub result: Option<Result<(), SchedError>>,
    /// INTRA successors chained onto this task's completion,
    /// generation-checked at notify time.
    pub successors: Vec<Handle>,
    /// Occupancy-table entry referenced while this job is live.
    pub occ_index: Option<usize>,
    /// Broadcast on every terminal transition of this slot.
    pub completed: Arc<Condvar>,
}

impl TaskSlot {
    fn new() -> Self {
        Self {
            job: 0,
            state: SlotState::Free,
            item: None,
            unresolved: 0,
            occupancy: 0,
            thread_mask: 0,
            calls: 0,
            last_poll: None,
            busy_time: Duration::ZERO,
            hw_event_seen: 0,
            waiting: false,
            result: None,
            successors: Vec::new(),
            occ_index: None,
            completed: Arc::new(Condvar::new()),
        }
    }

    /// Runnable: admitted, not terminal, and no terminal outcome queued.
    pub fn is_runnable(&self) -> bool {
        self.state == SlotState::Active && self.result.is_none()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SlotState::Done | SlotState::Failed(_))
    }

    pub fn handle(&self, task: TaskId) -> Handle {
        Handle { task, job: self.job }
    }
}

/// Bookkeeping record of a failed job, retained until `reset()`.
/// Owner-scoped waits consult these so a failure is reported even
/// after the slot itself has been reclaimed.
#[derive(Debug, Clone)]
pub struct FailedRecord {
    pub handle: Handle,
    pub owner: OwnerId,
    pub error: SchedError,
    pub at: DateTime<Utc>,
}

/// The task slot arena plus its free list and failed-job bookkeeping.
pub(crate) struct TaskPool {
    slots: Vec<TaskSlot>,
    free: VecDeque<TaskId>,
    capacity: usize,
    next_job: u32,
    pub failed: Vec<FailedRecord>,
}

impl TaskPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            capacity,
            next_job: 1,
            failed: Vec::new(),
        }
    }

    /// Sweep terminal slots back onto the free list. Returns how many
    /// slots were reclaimed.
    pub fn collect(&mut self) -> usize {
        let mut reclaimed = 0;
        for id in 0..self.slots.len() {
            let slot = &mut self.slots[id];
            if slot.is_terminal() && slot.occupancy == 0 {
                slot.state = SlotState::Free;
                slot.item = None;
                slot.successors.clear();
                slot.occ_index = None;
                self.free.push_back(id);
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Reserve a free slot, allocating a new one up to the hard
    /// capacity. `None` means the pool is exhausted (device busy).
    pub fn acquire(&mut self) -> Option<TaskId> {
        self.collect();
        if let Some(id) = self.free.pop_front() {
            return Some(id);
        }
        if self.slots.len() < self.capacity {
            self.slots.push(TaskSlot::new());
            return Some(self.slots.len() - 1);
        }
        None
    }

    /// Stamp a fresh generation onto a reserved slot and install the
    /// work item. Returns the new handle.
    pub fn begin_job(&mut self, id: TaskId, item: WorkItem) -> Handle {
        let job = self.next_job;
        self.next_job = if self.next_job >= JOB_ID_MAX { 1 } else { self.next_job + 1 };

        let slot = &mut self.slots[id];
        slot.job = job;
        slot.state = SlotState::Active;
        slot.item = Some(item);
        slot.unresolved = 0;
        slot.occupancy = 0;
        slot.thread_mask = 0;
        slot.calls = 0;
        slot.last_poll = None;
        slot.busy_time = Duration::ZERO;
        slot.hw_event_seen = 0;
        slot.waiting = false;
        slot.result = None;
        slot.successors.clear();
        slot.occ_index = None;
        Handle { task: id, job }
    }

    /// Roll an admission back: return a just-reserved slot to the free
    /// list without leaving a terminal record behind.
    pub fn abandon(&mut self, id: TaskId) {
        let slot = &mut self.slots[id];
        slot.state = SlotState::Free;
        slot.item = None;
        slot.successors.clear();
        slot.occ_index = None;
        self.free.push_back(id);
    }

    /// Generation-checked lookup; the core defense against stale
    /// handles. `None` if the index is out of range, the slot is free,
    /// or the generation no longer matches.
    pub fn resolve(&self, handle: Handle) -> Option<&TaskSlot> {
        let slot = self.slots.get(handle.task)?;
        (slot.state != SlotState::Free && slot.job == handle.job).then_some(slot)
    }

    pub fn resolve_mut(&mut self, handle: Handle) -> Option<&mut TaskSlot> {
        let slot = self.slots.get_mut(handle.task)?;
        (slot.state != SlotState::Free && slot.job == handle.job).then_some(slot)
    }

    /// Direct slot access for scheduler-internal task ids.
    pub fn slot(&self, id: TaskId) -> &TaskSlot {
        &self.slots[id]
    }

    pub fn slot_mut(&mut self, id: TaskId) -> &mut TaskSlot {
        &mut self.slots[id]
    }

    /// True when no admitted job remains unfinished.
    pub fn all_terminal(&self) -> bool {
        self.slots.iter().all(|s| s.state != SlotState::Active)
    }

    /// Ids of all currently-admitted (non-terminal) jobs.
    pub fn active_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::Active)
            .map(|(id, _)| id)
    }

    pub fn record_failed(&mut self, handle: Handle, owner: OwnerId, error: SchedError) {
        self.failed.push(FailedRecord { handle, owner, error, at: Utc::now() });
    }

    #[cfg(test)]
    pub fn set_next_job(&mut self, job: u32) {
        self.next_job = job;
    }
}
