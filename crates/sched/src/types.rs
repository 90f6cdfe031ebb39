use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use takt_core::SchedError;

/// Maximum number of declared source (and destination) dependency
/// resources per task.
pub const MAX_DEPENDENCIES: usize = 4;

/// Maximum concurrent thread slots an INTER-policy task may claim.
pub const MAX_THREADS_PER_TASK: u32 = 64;

/// Generation values wrap here, skipping 0 (0 is reserved so that a
/// zero-initialized handle never aliases a live task).
pub const JOB_ID_MAX: u32 = u32::MAX;

/// Task execution priority. Lower numeric value = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl Priority {
    pub const COUNT: usize = 3;
    /// Scan order used by the selection loop (high to low).
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Whether a task drives a hardware engine or runs pure CPU work.
/// Worker 0 prefers software tasks; the remaining workers scan
/// hardware tasks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Hardware,
    Software,
}

impl TaskType {
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        match self {
            TaskType::Hardware => 0,
            TaskType::Software => 1,
        }
    }
}

/// How instances of one work identity may be spread across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadingPolicy {
    /// One instance system-wide, strictly ordered after the previous
    /// instance of the same identity (implicit dependency chain).
    Intra,
    /// Up to `thread_count` instances sharing the per-task thread mask.
    Inter,
    /// Only worker 0 may run it.
    Dedicated,
    /// May legitimately report "not ready yet"; retried subject to the
    /// configured cooldown and the hardware-event counter.
    Wait,
}

/// Slot index into the task pool. Stable for the slot's lifetime.
pub type TaskId = usize;

/// Generation counter; never 0 for a live task.
pub type JobId = u32;

/// Identifies one submission of a task slot. Valid only while the
/// slot's current job id matches; a mismatching handle is treated as
/// "already completed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub task: TaskId,
    pub job: JobId,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.task, self.job)
    }
}

/// Opaque work identity: a caller-chosen discriminant that stands in
/// for the (state, routine) pointer pair of the original middleware.
/// Tasks sharing an identity share one occupancy-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkIdentity(pub u64);

/// Opaque producer/consumer resource identity. Never dereferenced or
/// interpreted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u64);

/// Opaque submitter identity, used by owner-scoped waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u64);

/// What one entry-point invocation reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task finished successfully.
    Done,
    /// More work remains; re-invoke with an incremented call counter.
    NeedContinue,
    /// Legitimately not ready yet (WAIT-style polling); retry after the
    /// cooldown or the next hardware event.
    Busy,
    /// Terminal failure, propagated to all dependents.
    Failed(SchedError),
}

/// Coarse job state reported by `Scheduler::task_status`. A stale
/// handle reports `Done`, since slot reuse makes staleness
/// indistinguishable from completion by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Done,
    Failed(SchedError),
}

/// Per-invocation context handed to the entry point.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    /// How many times this task's entry point has been invoked,
    /// counting this call (starts at 1).
    pub call: u64,
    /// Claimed bit in the task's thread mask. Always 0 except for
    /// INTER tasks running multiple instances.
    pub thread_slot: u32,
}

/// A unit of opaque schedulable work.
///
/// Implementations wrap codec operations (encode/decode/VPP stages)
/// without the scheduler knowing what the work represents.
pub trait WorkRoutine: Send + Sync {
    /// Execute one invocation. Always called outside the scheduler lock.
    fn run(&self, ctx: &CallContext) -> TaskOutcome;

    /// Called exactly once, outside the lock, after a terminal status,
    /// for tasks whose entry point ran at least once.
    fn free_resources(&self) {}
}

/// Everything `add_task` needs to admit one task.
#[derive(Clone)]
pub struct WorkItem {
    pub routine: Arc<dyn WorkRoutine>,
    pub identity: WorkIdentity,
    pub priority: Priority,
    pub task_type: TaskType,
    pub policy: ThreadingPolicy,
    /// Thread-slot width for INTER tasks; must be 1 otherwise.
    pub thread_count: u32,
    /// Resources this task must wait on.
    pub src: Vec<ResourceId>,
    /// Resources this task promises to produce.
    pub dst: Vec<ResourceId>,
    pub owner: OwnerId,
}

impl WorkItem {
    /// Minimal well-formed item: software, normal priority, INTER with
    /// a single thread slot, no dependencies.
    pub fn new(routine: Arc<dyn WorkRoutine>, identity: WorkIdentity, owner: OwnerId) -> Self {
        Self {
            routine,
            identity,
            priority: Priority::Normal,
            task_type: TaskType::Software,
            policy: ThreadingPolicy::Inter,
            thread_count: 1,
            src: Vec::new(),
            dst: Vec::new(),
            owner,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn policy(mut self, policy: ThreadingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn thread_count(mut self, count: u32) -> Self {
        self.thread_count = count;
        self
    }

    pub fn depends_on(mut self, resource: ResourceId) -> Self {
        self.src.push(resource);
        self
    }

    pub fn produces(mut self, resource: ResourceId) -> Self {
        self.dst.push(resource);
        self
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("identity", &self.identity)
            .field("priority", &self.priority)
            .field("task_type", &self.task_type)
            .field("policy", &self.policy)
            .field("thread_count", &self.thread_count)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl WorkRoutine for Noop {
        fn run(&self, _ctx: &CallContext) -> TaskOutcome {
            TaskOutcome::Done
        }
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::ALL[0], Priority::High);
    }

    #[test]
    fn handle_display() {
        let h = Handle { task: 3, job: 17 };
        assert_eq!(h.to_string(), "task#3.17");
    }

    #[test]
    fn work_item_builder() {
        let item = WorkItem::new(Arc::new(Noop), WorkIdentity(1), OwnerId(9))
            .priority(Priority::High)
            .task_type(TaskType::Hardware)
            .policy(ThreadingPolicy::Wait)
            .depends_on(ResourceId(5))
            .produces(ResourceId(6));
        assert_eq!(item.priority, Priority::High);
        assert_eq!(item.task_type, TaskType::Hardware);
        assert_eq!(item.policy, ThreadingPolicy::Wait);
        assert_eq!(item.src, vec![ResourceId(5)]);
        assert_eq!(item.dst, vec![ResourceId(6)]);
        assert_eq!(item.thread_count, 1);
    }
}
