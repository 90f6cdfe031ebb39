use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Priority;

/// Scheduler operational metrics, exposed as a snapshot to tracing
/// dashboards and the codec front-ends.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SchedulerMetrics {
    /// Entry-point invocations per priority class.
    pub invocations: HashMap<Priority, u64>,
    /// Jobs that reached DONE.
    pub completed: u64,
    /// Jobs that reached a failure status (including inherited ones).
    pub failed: u64,
    /// "Not ready yet" polls reported by WAIT-style tasks.
    pub busy_polls: u64,
    /// Tasks currently admitted and not terminal.
    pub pending: usize,
    /// Rolling average entry-point execution time.
    pub avg_run_time: Duration,
    /// Timestamp of the most recent completion or failure.
    pub last_activity: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record one entry-point invocation.
    pub fn record_invocation(&mut self, priority: Priority, elapsed: Duration) {
        *self.invocations.entry(priority).or_default() += 1;

        // Incremental mean: new_avg = prev_avg + (elapsed - prev_avg) / count
        let count: u64 = self.invocations.values().sum();
        if count == 1 {
            self.avg_run_time = elapsed;
        } else {
            let prev_nanos = self.avg_run_time.as_nanos() as f64;
            let cur_nanos = elapsed.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            self.avg_run_time = Duration::from_nanos(avg_nanos as u64);
        }
    }

    pub fn record_completed(&mut self) {
        self.completed += 1;
        self.last_activity = Some(Utc::now());
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
        self.last_activity = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_invocation() {
        let mut m = SchedulerMetrics::default();
        m.record_invocation(Priority::High, Duration::from_millis(100));

        assert_eq!(m.invocations[&Priority::High], 1);
        assert_eq!(m.avg_run_time, Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_invocations_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_invocation(Priority::High, Duration::from_millis(100));
        m.record_invocation(Priority::Low, Duration::from_millis(200));

        assert_eq!(m.invocations[&Priority::High], 1);
        assert_eq!(m.invocations[&Priority::Low], 1);
        // Average of 100ms and 200ms = 150ms
        let avg = m.avg_run_time.as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn completion_stamps_activity() {
        let mut m = SchedulerMetrics::default();
        assert!(m.last_activity.is_none());
        m.record_completed();
        assert_eq!(m.completed, 1);
        assert!(m.last_activity.is_some());
    }

    #[test]
    fn metrics_serialize() {
        let mut m = SchedulerMetrics::default();
        m.record_invocation(Priority::Normal, Duration::from_millis(5));
        m.record_failed();
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"failed\":1"));
    }
}
