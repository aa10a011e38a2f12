use serde::{Deserialize, Serialize};

/// Why a task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Explicit kill request.
    Killed,
    /// The configured timeout elapsed.
    TimedOut,
    /// The reported loss reached the configured threshold.
    ThresholdReached,
    /// Startup aborted before any worker was launched.
    StartupFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Killed => "killed",
            StopReason::TimedOut => "timed_out",
            StopReason::ThresholdReached => "threshold_reached",
            StopReason::StartupFailed => "startup_failed",
        }
    }
}

/// Lifecycle state of one experiment.
///
/// ```text
/// created -> starting -> running -> {timed_out | threshold_reached | killed} -> dead
///               \-> failed -> dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Created,
    Starting,
    Running,
    TimedOut,
    ThresholdReached,
    Killed,
    Failed,
    /// Terminal. Every getter becomes a view of frozen history.
    Dead,
}

impl TaskState {
    /// The transitional state a task enters when it begins stopping for `reason`.
    pub fn stopping(reason: StopReason) -> Self {
        match reason {
            StopReason::Killed => TaskState::Killed,
            StopReason::TimedOut => TaskState::TimedOut,
            StopReason::ThresholdReached => TaskState::ThresholdReached,
            StopReason::StartupFailed => TaskState::Failed,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, TaskState::Dead)
    }

    /// Returns `true` while the task is tearing down.
    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            TaskState::TimedOut | TaskState::ThresholdReached | TaskState::Killed | TaskState::Failed
        )
    }

    /// Returns `true` if the task may still launch workers.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Created, Starting) => true,
            (Starting, Running) => true,
            (Created | Starting, Failed | Killed) => true,
            (Running, TimedOut | ThresholdReached | Killed) => true,
            (TimedOut | ThresholdReached | Killed | Failed, Dead) => true,
            (Created, Dead) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        assert!(TaskState::Created.can_transition(TaskState::Starting));
        assert!(TaskState::Starting.can_transition(TaskState::Running));
        assert!(TaskState::Running.can_transition(TaskState::Killed));
        assert!(TaskState::Killed.can_transition(TaskState::Dead));
    }

    #[test]
    fn dead_is_terminal() {
        for next in [
            TaskState::Created,
            TaskState::Starting,
            TaskState::Running,
            TaskState::Killed,
            TaskState::Dead,
        ] {
            assert!(!TaskState::Dead.can_transition(next));
        }
    }

    #[test]
    fn running_cannot_skip_stopping() {
        assert!(!TaskState::Running.can_transition(TaskState::Dead));
        assert!(!TaskState::Running.can_transition(TaskState::Starting));
    }

    #[test]
    fn stopping_maps_reason() {
        assert_eq!(TaskState::stopping(StopReason::TimedOut), TaskState::TimedOut);
        assert_eq!(TaskState::stopping(StopReason::StartupFailed), TaskState::Failed);
        assert!(TaskState::stopping(StopReason::Killed).is_stopping());
    }

    #[test]
    fn serde_camel_case() {
        let json = serde_json::to_string(&TaskState::ThresholdReached).unwrap();
        assert_eq!(json, r#""thresholdReached""#);
    }
}
