use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Dollars, MetricKind, MetricPoint, Seconds, StopReason, TaskId, TaskState};

/// Read-only view of one experiment, as consumed by dashboards and the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub algorithm: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub num_workers: u32,
    pub elapsed: Seconds,
    pub cost: Dollars,
    pub cost_per_second: Dollars,
    /// Workers connected at the last successful liveness probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_workers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_loss: Option<f64>,
    pub series: BTreeMap<MetricKind, Vec<MetricPoint>>,
}
