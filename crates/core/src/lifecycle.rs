//! Job lifecycle state machine.
//!
//! A job's `status` column holds one of the uppercase codes below. All
//! transitions are validated here and applied in the repository layer via
//! compare-and-swap updates, so a concurrent illegal transition loses the
//! race instead of corrupting state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of automatic retries for a recoverable failure.
pub const MAX_RETRIES: u32 = 2;

// ---------------------------------------------------------------------------
// Runtime error codes stored on the job record
// ---------------------------------------------------------------------------

/// Error codes recorded in a job's structured `error` field.
pub mod error_codes {
    /// The job exceeded its execution deadline. Retryable.
    pub const WORKER_TIMEOUT: &str = "WORKER_TIMEOUT";
    /// The worker failed or died mid-run. Retryable.
    pub const WORKER_ERROR: &str = "WORKER_ERROR";
    /// The worker ran out of GPU memory. Not retryable.
    pub const OOM: &str = "OOM";
    /// A control-plane bug or unexpected condition.
    pub const INTERNAL: &str = "INTERNAL";
}

/// Whether a failure with this error code qualifies for automatic requeue.
pub fn is_retryable(code: &str) -> bool {
    matches!(
        code,
        error_codes::WORKER_TIMEOUT | error_codes::WORKER_ERROR
    )
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Job lifecycle states. `Created` exists only inside the admission
/// transaction; every job visible outside it is `Queued` or later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "CREATED" => Some(JobStatus::Created),
            "QUEUED" => Some(JobStatus::Queued),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The set of states reachable from `self`.
    pub fn valid_transitions(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Created => &[JobStatus::Queued, JobStatus::Cancelled],
            JobStatus::Queued => &[JobStatus::Running, JobStatus::Cancelled],
            // Running -> Queued is the recoverable-failure requeue path.
            JobStatus::Running => &[
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Queued,
                JobStatus::Cancelled,
            ],
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => &[],
        }
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a transition, returning a message suitable for a
    /// `STATE_CONFLICT` error.
    pub fn validate_transition(self, to: JobStatus) -> Result<(), String> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {self} -> {to}"))
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Valid transitions --------------------------------------------------

    #[test]
    fn created_to_queued() {
        assert!(JobStatus::Created.can_transition(JobStatus::Queued));
    }

    #[test]
    fn queued_to_running() {
        assert!(JobStatus::Queued.can_transition(JobStatus::Running));
    }

    #[test]
    fn queued_to_cancelled() {
        assert!(JobStatus::Queued.can_transition(JobStatus::Cancelled));
    }

    #[test]
    fn running_to_completed() {
        assert!(JobStatus::Running.can_transition(JobStatus::Completed));
    }

    #[test]
    fn running_to_failed() {
        assert!(JobStatus::Running.can_transition(JobStatus::Failed));
    }

    #[test]
    fn running_requeues_on_recoverable_failure() {
        assert!(JobStatus::Running.can_transition(JobStatus::Queued));
    }

    #[test]
    fn running_to_cancelled() {
        assert!(JobStatus::Running.can_transition(JobStatus::Cancelled));
    }

    // -- Invalid transitions ------------------------------------------------

    #[test]
    fn queued_cannot_complete_directly() {
        assert!(!JobStatus::Queued.can_transition(JobStatus::Completed));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.valid_transitions().is_empty());
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn validate_transition_names_both_states() {
        let err = JobStatus::Completed
            .validate_transition(JobStatus::Running)
            .unwrap_err();
        assert!(err.contains("COMPLETED"));
        assert!(err.contains("RUNNING"));
    }

    // -- Parsing ------------------------------------------------------------

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            JobStatus::Created,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_status_parses_to_none() {
        assert_eq!(JobStatus::parse("PAUSED"), None);
    }

    #[test]
    fn status_serializes_as_uppercase_code() {
        let json = serde_json::to_string(&JobStatus::Queued).unwrap();
        assert_eq!(json, "\"QUEUED\"");
    }

    // -- Retry classification -----------------------------------------------

    #[test]
    fn timeout_and_worker_error_are_retryable() {
        assert!(is_retryable(error_codes::WORKER_TIMEOUT));
        assert!(is_retryable(error_codes::WORKER_ERROR));
    }

    #[test]
    fn oom_is_not_retryable() {
        assert!(!is_retryable(error_codes::OOM));
        assert!(!is_retryable(error_codes::INTERNAL));
    }
}
