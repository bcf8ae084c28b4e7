//! Tracker status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tracker status.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed
///
/// Re-enqueueing a job resets its record to Pending; that is a reset, not a
/// transition, and goes through `TrackerRecord::reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    /// Enqueued, not started yet.
    #[default]
    Pending,

    /// Job body is executing.
    Running,

    /// Finished with `current == target`.
    Completed,

    /// Job body raised an error.
    Failed,
}

impl TrackerStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackerStatus::Completed | TrackerStatus::Failed)
    }

    pub fn can_transition_to(self, next: TrackerStatus) -> bool {
        matches!(
            (self, next),
            (TrackerStatus::Pending, TrackerStatus::Running)
                | (TrackerStatus::Running, TrackerStatus::Completed)
                | (TrackerStatus::Running, TrackerStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackerStatus::Pending => "pending",
            TrackerStatus::Running => "running",
            TrackerStatus::Completed => "completed",
            TrackerStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
