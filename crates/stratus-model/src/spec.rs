use serde::{Deserialize, Serialize};

use crate::{Algorithm, ModelError};

/// Where the training data lives and how it is split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRef {
    /// Object-storage bucket holding the pre-chunked dataset.
    pub bucket: String,
    /// Inclusive chunk range used for training.
    pub train_set: (u32, u32),
    /// Inclusive chunk range used for evaluation.
    pub test_set: (u32, u32),
    /// Samples per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Total dataset volume, used by the cost model.
    #[serde(default)]
    pub size_mb: f64,
}

fn default_chunk_size() -> u32 {
    50_000
}

impl DatasetRef {
    pub fn train_range(&self) -> String {
        format!("{}-{}", self.train_set.0, self.train_set.1)
    }

    pub fn test_range(&self) -> String {
        format!("{}-{}", self.test_set.0, self.test_set.1)
    }

    /// Number of chunks across both ranges.
    pub fn chunk_count(&self) -> u32 {
        let span = |(a, b): (u32, u32)| b.saturating_sub(a) + 1;
        span(self.train_set) + span(self.test_set)
    }
}

impl Default for DatasetRef {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            train_set: (0, 824),
            test_set: (825, 840),
            chunk_size: default_chunk_size(),
            size_mb: 0.0,
        }
    }
}

/// Fixed resources an experiment pays for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceParams {
    /// Instance type hosting the coordinator.
    pub vm_type: String,
    pub num_vms: u32,
    /// Memory size of each worker invocation.
    pub worker_memory_mb: u32,
    /// Maximum lifetime of one worker invocation before it exits and is replaced.
    pub invocation_secs: u32,
}

impl Default for ResourceParams {
    fn default() -> Self {
        Self {
            vm_type: "m5.large".to_string(),
            num_vms: 1,
            worker_memory_mb: 3008,
            invocation_secs: 300,
        }
    }
}

/// Immutable configuration of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub name: String,
    /// Desired number of concurrently connected workers.
    pub num_workers: u32,
    pub learning_rate: f64,
    pub epsilon: f64,
    pub minibatch_size: u32,
    pub model_bits: u32,
    pub dataset: DatasetRef,
    #[serde(default)]
    pub resources: ResourceParams,
    /// Stop the experiment after this long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Stop the experiment once the reported loss drops to this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_threshold: Option<f64>,
    pub algorithm: Algorithm,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, num_workers: u32, algorithm: Algorithm) -> Self {
        Self {
            name: name.into(),
            num_workers,
            learning_rate: 0.01,
            epsilon: 0.0001,
            minibatch_size: 20,
            model_bits: 19,
            dataset: DatasetRef::default(),
            resources: ResourceParams::default(),
            timeout_secs: None,
            loss_threshold: None,
            algorithm,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.dataset.bucket = bucket.into();
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_minibatch_size(mut self, size: u32) -> Self {
        self.minibatch_size = size;
        self
    }

    pub fn with_workers(mut self, n: u32) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_loss_threshold(mut self, threshold: f64) -> Self {
        self.loss_threshold = Some(threshold);
        self
    }

    /// Rejects values the executables cannot run with.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.num_workers == 0 {
            return Err(ModelError::InvalidSpec("num_workers must be positive".into()));
        }
        if self.minibatch_size == 0 {
            return Err(ModelError::InvalidSpec("minibatch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::InvalidSpec(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.dataset.train_set.0 > self.dataset.train_set.1
            || self.dataset.test_set.0 > self.dataset.test_set.1
        {
            return Err(ModelError::InvalidSpec("dataset ranges must be ascending".into()));
        }
        Ok(())
    }
}
