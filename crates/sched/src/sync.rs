//! Blocking wait primitives keyed by task handle, dependency resource
//! or owner identity, plus the drain/reset path.
//!
//! Every slot broadcasts its own condition variable on terminal
//! transitions. In single-thread mode nothing else makes progress, so
//! the wait calls pump the scheduling step inline on the calling
//! thread instead of blocking.

use std::time::{Duration, Instant};

use takt_core::{SchedError, SchedResult};
use tracing::{info, warn};

use crate::pool::SlotState;
use crate::runner::execution::{run_one, StepOutcome};
use crate::runner::Scheduler;
use crate::types::{Handle, OwnerId, ResourceId, TaskState};

/// Poll interval of the owner-drain loop.
const OWNER_WAIT_SLICE: Duration = Duration::from_millis(15);

/// Wait slice of the drain watchdog loop.
const DRAIN_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Sleep between pump steps when the cooperative driver found no ready
/// task (e.g. everything is cooling down after "not ready" polls).
const PUMP_IDLE_SLEEP: Duration = Duration::from_millis(1);

impl Scheduler {
    /// Block until the job behind `handle` reaches a terminal status or
    /// the timeout elapses (`None` = wait forever).
    ///
    /// A stale handle returns success immediately: slot reuse makes
    /// staleness indistinguishable from completion by design. A timeout
    /// reports `InExecution`; a failed job reports its terminal status.
    pub fn synchronize(&self, handle: Handle, timeout: Option<Duration>) -> SchedResult<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        if self.inner.config.single_thread {
            return self.pump_until(handle, deadline);
        }

        let mut guard = self.inner.state.lock().unwrap();
        loop {
            let completed = match guard.pool.resolve(handle) {
                None => return Ok(()),
                Some(slot) => match slot.state {
                    SlotState::Done => return Ok(()),
                    SlotState::Failed(err) => return Err(err),
                    _ => slot.completed.clone(),
                },
            };
            guard = match deadline {
                None => completed.wait(guard).unwrap(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(SchedError::InExecution);
                    }
                    completed.wait_timeout(guard, remaining).unwrap().0
                }
            };
        }
    }

    /// Cooperative driver: run the scheduling loop inline until the
    /// target job completes. Keeps readiness/fairness semantics
    /// identical to the worker-pool driver by sharing `run_one`.
    fn pump_until(&self, handle: Handle, deadline: Option<Instant>) -> SchedResult<()> {
        let mut prev = None;
        loop {
            match self.task_status(handle) {
                TaskState::Done => return Ok(()),
                TaskState::Failed(err) => return Err(err),
                TaskState::Pending => {}
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(SchedError::InExecution);
            }
            match run_one(&self.inner, 0, prev.take()) {
                StepOutcome::Ran(h) => prev = Some(h),
                StepOutcome::Idle => std::thread::sleep(PUMP_IDLE_SLEEP),
            }
        }
    }

    /// Wait for the current producer of `resource`, if any. A no-op
    /// when the resource has no pending producer.
    pub fn wait_for_dependency(&self, resource: ResourceId) -> SchedResult<()> {
        let producer = self.inner.state.lock().unwrap().deps.producer_of(resource);
        match producer {
            None => Ok(()),
            Some(handle) => self.synchronize(handle, None),
        }
    }

    /// Drain every task tagged with `owner` without tracking individual
    /// handles. Returns the first failure observed among them, if any.
    pub fn wait_for_owner(&self, owner: OwnerId) -> SchedResult<()> {
        let mut first_failure = None;
        loop {
            let next = {
                let mut guard = self.inner.state.lock().unwrap();
                guard.clear_waiting_for(owner);
                guard.highest_pending_for(owner)
            };
            self.inner.new_work.notify_all();

            let Some(handle) = next else {
                // A task of this owner may have failed (and had its
                // slot reclaimed) before it was ever synchronized on;
                // the failed-job records keep that status reportable.
                if first_failure.is_none() {
                    let guard = self.inner.state.lock().unwrap();
                    first_failure = guard
                        .pool
                        .failed
                        .iter()
                        .find(|record| record.owner == owner)
                        .map(|record| record.error);
                }
                return first_failure.map_or(Ok(()), Err);
            };
            match self.synchronize(handle, Some(OWNER_WAIT_SLICE)) {
                Ok(()) | Err(SchedError::InExecution) => {}
                Err(err) => {
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }
    }

    /// Clear the poll cooldown for `owner`'s tasks so workers retry
    /// them immediately.
    pub fn reset_waiting(&self, owner: OwnerId) {
        self.inner.state.lock().unwrap().clear_waiting_for(owner);
        self.inner.new_work.notify_all();
    }

    /// Current state of the job behind `handle` without blocking.
    pub fn task_status(&self, handle: Handle) -> TaskState {
        let guard = self.inner.state.lock().unwrap();
        match guard.pool.resolve(handle) {
            None => TaskState::Done,
            Some(slot) => match slot.state {
                SlotState::Done => TaskState::Done,
                SlotState::Failed(err) => TaskState::Failed(err),
                _ => TaskState::Pending,
            },
        }
    }

    /// Drain all outstanding work, then clear failed-task bookkeeping
    /// and compact the tables. Reports `Hang` if the pool makes no
    /// progress within the configured drain timeout — the signal that
    /// the device is wedged rather than slow.
    pub fn reset(&self) -> SchedResult<()> {
        self.drain(self.inner.config.drain_timeout())?;

        let mut guard = self.inner.state.lock().unwrap();
        guard.pool.collect();
        guard.pool.failed.clear();
        guard.deps.purge_failed();
        guard.refresh_pending();
        info!("scheduler reset complete");
        Ok(())
    }

    fn drain(&self, timeout: Duration) -> SchedResult<()> {
        let deadline = Instant::now() + timeout;

        if self.inner.config.single_thread {
            let mut prev = None;
            loop {
                if self.inner.state.lock().unwrap().pool.all_terminal() {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    warn!("drain timed out; reporting device hang");
                    return Err(SchedError::Hang);
                }
                match run_one(&self.inner, 0, prev.take()) {
                    StepOutcome::Ran(h) => prev = Some(h),
                    StepOutcome::Idle => std::thread::sleep(PUMP_IDLE_SLEEP),
                }
            }
        }

        let mut guard = self.inner.state.lock().unwrap();
        while !guard.pool.all_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("drain timed out; reporting device hang");
                return Err(SchedError::Hang);
            }
            guard = self
                .inner
                .free_slot
                .wait_timeout(guard, remaining.min(DRAIN_WAIT_SLICE))
                .unwrap()
                .0;
        }
        Ok(())
    }
}
