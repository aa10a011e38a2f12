//! Prometheus exporter for stratus fleet events.
//!
//! [`PrometheusMetrics`] is a [`stratus_core::Subscribe`] implementation: hand
//! it to the `EventBus` and it keeps counters and per-experiment gauges up to
//! date from the lifecycle and fleet events.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use stratus_core::{EventBus, Subscribe};
//! use stratus_prometheus::PrometheusMetrics;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let bus = EventBus::new(vec![Arc::new(metrics.clone()) as Arc<dyn Subscribe>]);
//! # drop(bus);
//! let text = metrics.encode()?;
//! # let _ = text;
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `stratus_workers_launched_total{task}` - Counter
//! - `stratus_launch_failures_total{task}` - Counter
//! - `stratus_probe_failures_total{task}` - Counter
//! - `stratus_tasks_stopped_total{reason}` - Counter
//! - `stratus_task_loss{task}` - Gauge
//! - `stratus_task_cost_dollars{task}` - Gauge
//! - `stratus_task_workers{task}` - Gauge
//!
//! ## HTTP Server
//! This crate does NOT serve `/metrics`; `stratus-gridd` mounts
//! [`PrometheusMetrics::encode`] on its axum router.

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
