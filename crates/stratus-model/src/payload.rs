use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::TaskId;

/// Record delivered to one worker invocation.
///
/// Field names are part of the contract with the worker executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub task_id: TaskId,
    pub num_workers: u32,
    pub coordinator_ip: IpAddr,
    pub coordinator_port: u16,
    /// The remote side rejects a payload whose nonce it has already executed.
    pub dupe_nonce: u64,
}

/// Record delivered to one preprocessing invocation (one per data chunk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessPayload {
    pub chunk_id: u32,
    pub bucket: String,
    pub dupe_nonce: u64,
}

/// A single fire-and-forget remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Invocation {
    Worker(WorkerPayload),
    Preprocess(PreprocessPayload),
}

impl Invocation {
    pub fn nonce(&self) -> u64 {
        match self {
            Invocation::Worker(p) => p.dupe_nonce,
            Invocation::Preprocess(p) => p.dupe_nonce,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Invocation::Worker(_) => "worker",
            Invocation::Preprocess(_) => "preprocess",
        }
    }
}
