use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of one experiment.
///
/// Assigned sequentially by whoever enqueues the experiment and forwarded to
/// every worker invocation so the coordinator can attribute connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl TaskId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for TaskId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
