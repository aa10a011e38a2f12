use std::fmt;

use stratus_model::{ModelError, TaskId, TaskState};
use thiserror::Error;

use crate::platform::PlatformError;

/// Lazily constructed remote-service client kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Invoker,
    Capacity,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClientKind::Invoker => "invoker",
            ClientKind::Capacity => "capacity",
        })
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(
        "{task} requests {requested} workers but the per-task quota is {limit}{}; \
         reduce the worker count or raise the quota",
        .available.map(|a| format!(" ({a} currently available)")).unwrap_or_default()
    )]
    Capacity {
        task: TaskId,
        requested: u32,
        limit: u32,
        available: Option<u32>,
    },

    #[error(
        "insufficient capacity: {tasks} experiments x {per_task} reserved each = {required}, \
         but only {available} is available. Options: reduce the number of experiments, \
         reduce the per-experiment capacity, free capacity held by other runs, \
         or request a quota increase from the provider"
    )]
    InsufficientCapacity {
        tasks: usize,
        per_task: u32,
        required: u64,
        available: u32,
    },

    #[error("invalid task spec: {0}")]
    Spec(#[from] ModelError),

    #[error("coordinator error: {0}")]
    Coordinator(#[source] PlatformError),

    #[error("coordinator for {0} never became reachable")]
    CoordinatorUnreachable(TaskId),

    #[error("cannot construct {kind} client: {reason}")]
    Client { kind: ClientKind, reason: String },

    #[error("{task}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("{0} was stopped during startup")]
    Stopped(TaskId),

    #[error("teardown of {task} failed: {reason}; manual cleanup may be required")]
    Teardown { task: TaskId, reason: String },

    #[error("no experiment at index {0}")]
    NoSuchExperiment(usize),

    #[error("grid search is already running")]
    AlreadyRunning,

    #[error("preprocessing failed for {failed} of {chunks} data chunks")]
    Preprocess { failed: usize, chunks: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_the_numbers() {
        let e = CoreError::Capacity {
            task: TaskId(3),
            requested: 200,
            limit: 100,
            available: Some(40),
        };
        let msg = e.to_string();
        assert!(msg.contains("task-3"));
        assert!(msg.contains("200"));
        assert!(msg.contains("100"));
        assert!(msg.contains("40 currently available"));
    }

    #[test]
    fn insufficient_capacity_lists_remediations() {
        let msg = CoreError::InsufficientCapacity {
            tasks: 5,
            per_task: 100,
            required: 500,
            available: 400,
        }
        .to_string();
        for needle in ["500", "400", "reduce the number", "per-experiment", "free capacity", "quota increase"] {
            assert!(msg.contains(needle), "missing {needle:?} in {msg}");
        }
    }
}
