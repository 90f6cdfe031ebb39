use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use takt_core::{SchedError, SchedResult, SchedulerConfig};
use tracing::{debug, info};

use crate::deps::{DependencyTable, SourceLink};
use crate::fairness::FairnessAccountant;
use crate::metrics::SchedulerMetrics;
use crate::occupancy::OccupancyTable;
use crate::pool::{FailedRecord, TaskPool};
use crate::queues::QueueMatrix;
use crate::runner::execution::worker_loop;
use crate::types::{
    Handle, ThreadingPolicy, WorkItem, MAX_DEPENDENCIES, MAX_THREADS_PER_TASK,
};

/// Everything guarded by the single scheduler mutex: the slot pool,
/// the dependency/occupancy tables, the ready queues, the fairness
/// window ring and the metrics.
pub(crate) struct SchedState {
    pub pool: TaskPool,
    pub deps: DependencyTable,
    pub occupancy: OccupancyTable,
    pub queues: QueueMatrix,
    pub fairness: FairnessAccountant,
    pub metrics: SchedulerMetrics,
}

impl SchedState {
    pub(crate) fn new(config: &SchedulerConfig) -> Self {
        Self {
            pool: TaskPool::new(config.max_tasks),
            // the design assumes at most one pending destination set per
            // in-flight task, so 2x task capacity bounds the table
            deps: DependencyTable::new(config.max_tasks * 2),
            occupancy: OccupancyTable::new(config.max_tasks),
            queues: QueueMatrix::new(),
            fairness: FairnessAccountant::new(config.fairness_window(), config.fairness_windows),
            metrics: SchedulerMetrics::default(),
        }
    }

    pub fn refresh_pending(&mut self) {
        self.metrics.pending = self.pool.active_ids().count();
    }
}

/// State shared between the `Scheduler` façade, its worker threads and
/// the cooperative pump.
pub(crate) struct SchedInner {
    pub config: SchedulerConfig,
    pub state: Mutex<SchedState>,
    /// Workers park here when no ready task exists.
    pub new_work: Condvar,
    /// Capacity waiters (`add_task`, drain) park here; signaled on
    /// every job wrap-up.
    pub free_slot: Condvar,
    pub shutdown: AtomicBool,
    /// External hardware-event counter; WAIT-policy cooldowns are
    /// bypassed when it advances.
    pub hw_events: AtomicU64,
}

/// The task scheduler core: a fixed-capacity, priority-fair,
/// dependency-aware executor multiplexing opaque hardware and software
/// work items across a bounded worker pool.
///
/// Callers submit [`WorkItem`]s via [`Scheduler::add_task`] and block
/// on the returned [`Handle`] (or on a resource/owner identity) through
/// the synchronization façade in `sync.rs`. In single-thread mode no
/// workers are spawned and the wait calls pump the scheduling loop
/// inline.
pub struct Scheduler {
    pub(crate) inner: Arc<SchedInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build the scheduler and spawn its worker pool.
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        config.validate()?;
        let num_workers = config.resolved_worker_threads();
        info!(
            num_workers,
            max_tasks = config.max_tasks,
            single_thread = config.single_thread,
            "scheduler starting"
        );

        let inner = Arc::new(SchedInner {
            state: Mutex::new(SchedState::new(&config)),
            new_work: Condvar::new(),
            free_slot: Condvar::new(),
            shutdown: AtomicBool::new(false),
            hw_events: AtomicU64::new(0),
            config,
        });

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let worker_inner = Arc::clone(&inner);
            let hint = inner.config.os_priority_hint;
            let spawned = std::thread::Builder::new()
                .name(format!("takt-worker-{worker_id}"))
                .spawn(move || {
                    if hint != 0 {
                        debug!(worker_id, hint, "os priority hint recorded");
                    }
                    worker_loop(worker_inner, worker_id);
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(_) => {
                    // tear the partial pool down before reporting; the
                    // already-running workers must not outlive the error
                    inner.shutdown.store(true, Ordering::Release);
                    inner.new_work.notify_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SchedError::Busy);
                }
            }
        }

        Ok(Self { inner, workers: Mutex::new(workers) })
    }

    /// Submit one work item. Returns a generation-checked handle the
    /// caller can synchronize on, `Busy` when capacity is exhausted, or
    /// `InvalidParam` for malformed/conflicting declarations (in which
    /// case no state was mutated).
    pub fn add_task(&self, item: WorkItem) -> SchedResult<Handle> {
        if item.src.len() > MAX_DEPENDENCIES || item.dst.len() > MAX_DEPENDENCIES {
            return Err(SchedError::InvalidParam("too many declared dependencies"));
        }
        if item.thread_count == 0 || item.thread_count > MAX_THREADS_PER_TASK {
            return Err(SchedError::InvalidParam("thread count out of range"));
        }
        if item.policy != ThreadingPolicy::Inter && item.thread_count != 1 {
            return Err(SchedError::InvalidParam("thread count > 1 requires INTER policy"));
        }
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SchedError::Aborted);
        }

        let priority = item.priority;
        let task_type = item.task_type;
        let policy = item.policy;
        let src = item.src.clone();
        let dst = item.dst.clone();

        let mut guard = self.inner.state.lock().unwrap();

        let occ_idx =
            guard.occupancy.index_for(item.identity, policy, item.thread_count)?;

        // Bounded grace wait: a briefly-full pool is common right after
        // a burst of completions and resolves within one park interval.
        let id = match guard.pool.acquire() {
            Some(id) => id,
            None => {
                let (g, _) = self
                    .inner
                    .free_slot
                    .wait_timeout(guard, self.inner.config.idle_park())
                    .unwrap();
                guard = g;
                match guard.pool.acquire() {
                    Some(id) => id,
                    None => {
                        guard.occupancy.release(occ_idx);
                        return Err(SchedError::Busy);
                    }
                }
            }
        };

        let handle = guard.pool.begin_job(id, item);
        guard.pool.slot_mut(id).occ_index = Some(occ_idx);

        // Destination entries first: this is the only step that can
        // still fail, and it must leave no trace when it does.
        for &resource in &dst {
            if let Err(err) = guard.deps.insert_output(resource, handle) {
                guard.deps.complete_outputs(id, None);
                guard.pool.abandon(id);
                guard.occupancy.release(occ_idx);
                return Err(err);
            }
        }

        let mut inherited = None;
        for &resource in &src {
            match guard.deps.register_source(resource, handle) {
                SourceLink::Resolved => {}
                SourceLink::Linked => guard.pool.slot_mut(id).unresolved += 1,
                SourceLink::Failed(err) => {
                    inherited = Some(err);
                    break;
                }
            }
        }

        // INTRA tasks are serialized by chaining onto the previous
        // submission of the same identity; FIFO order falls out of the
        // ordinary dependency machinery.
        if policy == ThreadingPolicy::Intra {
            if let Some(prev) = guard.occupancy.last_intra(occ_idx) {
                if let Some(prev_slot) = guard.pool.resolve_mut(prev) {
                    if !prev_slot.is_terminal() {
                        prev_slot.successors.push(handle);
                        guard.pool.slot_mut(id).unresolved += 1;
                    }
                }
            }
            guard.occupancy.set_last_intra(occ_idx, handle);
        }

        if let Some(err) = inherited {
            // Producer already failed: the task never runs and reports
            // the inherited status to anyone synchronizing on it.
            let callbacks = guard.fail_task_cascade(id, err);
            debug_assert!(callbacks.is_empty());
            guard.refresh_pending();
            drop(guard);
            debug!(%handle, ?err, "task inherited failure at admission");
            return Ok(handle);
        }

        guard.queues.push(priority, task_type, id);
        guard.refresh_pending();
        drop(guard);

        self.inner.new_work.notify_all();
        debug!(%handle, ?priority, ?task_type, ?policy, "task admitted");
        Ok(handle)
    }

    /// Signal the external hardware-event counter. Wakes workers so
    /// WAIT-policy tasks can re-poll ahead of their cooldown.
    pub fn notify_hw_event(&self) {
        self.inner.hw_events.fetch_add(1, Ordering::AcqRel);
        self.inner.new_work.notify_all();
    }

    /// Snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.state.lock().unwrap().metrics.clone()
    }

    /// Failed-job records accumulated since the last `reset()`.
    pub fn failed_jobs(&self) -> Vec<FailedRecord> {
        self.inner.state.lock().unwrap().pool.failed.clone()
    }

    /// Force-abort every outstanding task and tear the pool down.
    /// Idempotent; also invoked by `Drop`.
    pub fn close(&self) -> SchedResult<()> {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("scheduler close requested");
        self.inner.new_work.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }

        // Workers are gone: every remaining task is idle and can be
        // force-completed with an aborted status. The slots stay in
        // their failed state (never collected) so waiters blocked
        // across close still observe the aborted status instead of a
        // stale handle.
        let mut guard = self.inner.state.lock().unwrap();
        let outstanding: Vec<_> = guard.pool.active_ids().collect();
        let mut callbacks = Vec::new();
        for id in outstanding {
            callbacks.extend(guard.fail_task_cascade(id, SchedError::Aborted));
        }
        guard.deps.clear();
        guard.occupancy.clear();
        guard.queues.clear();
        guard.refresh_pending();
        drop(guard);

        self.inner.free_slot.notify_all();
        for callback in callbacks {
            callback.free_resources();
        }
        info!("scheduler stopped");
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
