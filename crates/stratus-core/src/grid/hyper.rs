use serde::{Deserialize, Serialize};
use stratus_model::TaskSpec;

/// Cartesian hyper-parameter sweep around a base experiment.
///
/// An empty axis keeps the base value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperGrid {
    pub base: TaskSpec,
    #[serde(default)]
    pub learning_rates: Vec<f64>,
    #[serde(default)]
    pub minibatch_sizes: Vec<u32>,
    #[serde(default)]
    pub worker_counts: Vec<u32>,
}

impl HyperGrid {
    pub fn new(base: TaskSpec) -> Self {
        Self {
            base,
            learning_rates: Vec::new(),
            minibatch_sizes: Vec::new(),
            worker_counts: Vec::new(),
        }
    }

    pub fn with_learning_rates(mut self, values: impl Into<Vec<f64>>) -> Self {
        self.learning_rates = values.into();
        self
    }

    pub fn with_minibatch_sizes(mut self, values: impl Into<Vec<u32>>) -> Self {
        self.minibatch_sizes = values.into();
        self
    }

    pub fn with_worker_counts(mut self, values: impl Into<Vec<u32>>) -> Self {
        self.worker_counts = values.into();
        self
    }

    /// Number of experiments [`expand`](Self::expand) produces.
    pub fn point_count(&self) -> usize {
        [
            self.learning_rates.len(),
            self.minibatch_sizes.len(),
            self.worker_counts.len(),
        ]
        .iter()
        .map(|n| (*n).max(1))
        .product()
    }

    /// One spec per grid point, learning rate varying slowest.
    pub fn expand(&self) -> Vec<TaskSpec> {
        let lrs = axis(&self.learning_rates, self.base.learning_rate);
        let mbs = axis(&self.minibatch_sizes, self.base.minibatch_size);
        let workers = axis(&self.worker_counts, self.base.num_workers);

        let mut out = Vec::with_capacity(self.point_count());
        for &lr in &lrs {
            for &mb in &mbs {
                for &w in &workers {
                    let mut spec = self
                        .base
                        .clone()
                        .with_learning_rate(lr)
                        .with_minibatch_size(mb)
                        .with_workers(w);
                    spec.name = format!("{}-lr{lr}-mb{mb}-w{w}", self.base.name);
                    out.push(spec);
                }
            }
        }
        out
    }
}

fn axis<T: Copy>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}
