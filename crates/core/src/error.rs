use thiserror::Error;

/// Status/error surface shared by the scheduler and the codec front-ends.
///
/// Entry-point routines return these verbatim as a task's terminal status;
/// the scheduler itself only produces `Busy`, `InvalidParam`, `InExecution`
/// and `Hang` for capacity, admission and timeout conditions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Capacity exhausted (no free task slot, dependency-table slot, or
    /// occupancy entry). Retryable.
    #[error("device busy: scheduler capacity exhausted")]
    Busy,

    /// Malformed or conflicting submission. Nothing was mutated.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// The task is still pending; returned when a bounded wait expires.
    #[error("operation still in execution")]
    InExecution,

    /// The drain-on-reset watchdog expired without forward progress.
    /// Reported distinctly from task failure so callers can trigger a
    /// device reset instead of ordinary error propagation.
    #[error("device hang: drain timed out without progress")]
    Hang,

    /// The task was force-completed during shutdown or explicit abort.
    #[error("operation aborted")]
    Aborted,

    /// Generic failure reported by an entry point.
    #[error("unknown failure")]
    Unknown,
}

/// Convenience alias used across the workspace.
pub type SchedResult<T> = Result<T, SchedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            SchedError::Busy.to_string(),
            "device busy: scheduler capacity exhausted"
        );
        assert_eq!(
            SchedError::InvalidParam("bad thread count").to_string(),
            "invalid parameter: bad thread count"
        );
        assert_eq!(SchedError::Aborted.to_string(), "operation aborted");
    }

    #[test]
    fn errors_are_comparable() {
        assert_eq!(SchedError::Hang, SchedError::Hang);
        assert_ne!(SchedError::Busy, SchedError::InExecution);
    }
}
