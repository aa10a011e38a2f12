//! Data model shared by every stratus crate.
//!
//! Everything here is plain data plus pure functions: task specifications,
//! lifecycle states, metric series, the cost model, invocation payloads and
//! the algorithm-specific configuration renderers.

mod error;
pub use error::ModelError;

mod domain;
pub use domain::*;

mod kind;
pub use kind::*;

mod spec;
pub use spec::{DatasetRef, ResourceParams, TaskSpec};

mod cost;
pub use cost::CostModel;

mod metric;
pub use metric::{MetricKind, MetricPoint, MetricSeries};

mod payload;
pub use payload::{Invocation, PreprocessPayload, WorkerPayload};

mod strategy;
pub use strategy::{Attempts, BackoffStrategy, RetryPolicy};
