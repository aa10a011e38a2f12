use std::time::Duration;

use crate::{Dollars, ModelError, TaskSpec};

/// Serverless compute price per GB-second.
const INVOCATION_GB_SECOND: Dollars = 0.000_016_666_7;
/// Serverless request price per single invocation.
const INVOCATION_REQUEST: Dollars = 0.20 / 1_000_000.0;
/// Object storage price per GB-month.
const STORAGE_GB_MONTH: Dollars = 0.023;
const SECONDS_PER_MONTH: f64 = 30.0 * 24.0 * 3600.0;

/// On-demand hourly price of the instance types a coordinator may run on.
const INSTANCE_HOURLY: &[(&str, Dollars)] = &[
    ("t3.medium", 0.0416),
    ("t3.large", 0.0832),
    ("m5.large", 0.096),
    ("m5.xlarge", 0.192),
    ("m5.2xlarge", 0.384),
    ("m5.4xlarge", 0.768),
    ("c5.large", 0.085),
    ("c5.xlarge", 0.17),
    ("c5.2xlarge", 0.34),
    ("c5.4xlarge", 0.68),
    ("r5.large", 0.126),
    ("r5.xlarge", 0.252),
];

/// Running dollar cost of one experiment as a pure function of elapsed time.
///
/// Never persisted: rebuilt from the task spec whenever needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    vm_hourly: Dollars,
    num_vms: u32,
    num_workers: u32,
    worker_memory_gb: f64,
    invocation_secs: f64,
    storage_gb: f64,
}

impl CostModel {
    pub fn for_spec(spec: &TaskSpec) -> Result<Self, ModelError> {
        let res = &spec.resources;
        let vm_hourly = INSTANCE_HOURLY
            .iter()
            .find(|(name, _)| *name == res.vm_type)
            .map(|(_, price)| *price)
            .ok_or_else(|| ModelError::UnknownInstanceType(res.vm_type.clone()))?;

        Ok(Self {
            vm_hourly,
            num_vms: res.num_vms,
            num_workers: spec.num_workers,
            worker_memory_gb: f64::from(res.worker_memory_mb) / 1024.0,
            invocation_secs: f64::from(res.invocation_secs.max(1)),
            storage_gb: spec.dataset.size_mb.max(0.0) / 1024.0,
        })
    }

    /// Dollars spent per second while the experiment runs.
    pub fn cost_per_second(&self) -> Dollars {
        let vms = self.vm_hourly * f64::from(self.num_vms) / 3600.0;
        let workers = f64::from(self.num_workers);
        let compute = workers * self.worker_memory_gb * INVOCATION_GB_SECOND;
        let requests = workers / self.invocation_secs * INVOCATION_REQUEST;
        let storage = self.storage_gb * STORAGE_GB_MONTH / SECONDS_PER_MONTH;
        vms + compute + requests + storage
    }

    /// Total dollars spent after running for `elapsed`.
    pub fn cost(&self, elapsed: Duration) -> Dollars {
        self.cost_per_second() * elapsed.as_secs_f64()
    }
}
