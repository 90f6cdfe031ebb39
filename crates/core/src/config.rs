use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{SchedError, SchedResult};

/// Scheduler configuration, typically parsed from TOML.
///
/// Policy values (fairness ratios, WAIT cooldown, drain timeout) were
/// tuned empirically in production pipelines; they are configurable
/// rather than hard invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Cooperative mode: no OS workers are spawned, `synchronize` pumps
    /// the scheduling loop inline on the calling thread.
    #[serde(default)]
    pub single_thread: bool,
    /// Hard capacity of the task slot pool. The dependency table is
    /// sized at twice this value.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    /// Minimum interval between invocations of a WAIT-policy task that
    /// keeps reporting "not ready", unless a new hardware event arrives.
    #[serde(default = "default_wait_cooldown_ms")]
    pub wait_cooldown_ms: u64,
    /// Time-share budgets per priority class, `[high, normal, low]`,
    /// in percent of the time left over from higher classes.
    #[serde(default = "default_priority_ratios")]
    pub priority_ratios: [u32; 3],
    /// Duration of one fairness accounting window in milliseconds.
    #[serde(default = "default_fairness_window_ms")]
    pub fairness_window_ms: u64,
    /// Number of rolling fairness windows kept in the ring.
    #[serde(default = "default_fairness_windows")]
    pub fairness_windows: usize,
    /// Drain watchdog on reset/teardown; expiry is reported as a hang.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// How long an idle worker parks before rechecking the queues.
    #[serde(default = "default_idle_park_ms")]
    pub idle_park_ms: u64,
    /// Opaque OS thread-priority hint, recorded for the embedder and
    /// logged at spawn time. Not interpreted by the scheduler.
    #[serde(default)]
    pub os_priority_hint: i32,
}

fn default_worker_threads() -> usize { 0 }
fn default_max_tasks() -> usize { 128 }
fn default_wait_cooldown_ms() -> u64 { 1 }
fn default_priority_ratios() -> [u32; 3] { [100, 75, 100] }
fn default_fairness_window_ms() -> u64 { 125 }
fn default_fairness_windows() -> usize { 16 }
fn default_drain_timeout_secs() -> u64 { 600 }
fn default_idle_park_ms() -> u64 { 10 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            single_thread: false,
            max_tasks: default_max_tasks(),
            wait_cooldown_ms: default_wait_cooldown_ms(),
            priority_ratios: default_priority_ratios(),
            fairness_window_ms: default_fairness_window_ms(),
            fairness_windows: default_fairness_windows(),
            drain_timeout_secs: default_drain_timeout_secs(),
            idle_park_ms: default_idle_park_ms(),
            os_priority_hint: 0,
        }
    }
}

impl SchedulerConfig {
    /// Parse a config from a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> SchedResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|_| SchedError::InvalidParam("malformed config"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the scheduler cannot honor.
    pub fn validate(&self) -> SchedResult<()> {
        if self.max_tasks == 0 {
            return Err(SchedError::InvalidParam("max_tasks must be non-zero"));
        }
        if self.fairness_windows == 0 {
            return Err(SchedError::InvalidParam("fairness_windows must be non-zero"));
        }
        if self.priority_ratios.iter().any(|&r| r == 0 || r > 100) {
            return Err(SchedError::InvalidParam("priority ratios must be in 1..=100"));
        }
        Ok(())
    }

    /// Resolve worker thread count (0 means use available parallelism).
    /// Single-thread mode always resolves to 0 workers.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.single_thread {
            0
        } else if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn wait_cooldown(&self) -> Duration {
        Duration::from_millis(self.wait_cooldown_ms)
    }

    pub fn fairness_window(&self) -> Duration {
        Duration::from_millis(self.fairness_window_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn idle_park(&self) -> Duration {
        Duration::from_millis(self.idle_park_ms.max(1))
    }
}
