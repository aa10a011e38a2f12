use async_trait::async_trait;
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use stratus_core::{Event, EventKind, Subscribe};
use tracing::trace;

/// Event-driven Prometheus metrics; cloning shares the same registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    workers_launched: IntCounterVec,
    launch_failures: IntCounterVec,
    probe_failures: IntCounterVec,
    tasks_stopped: IntCounterVec,
    loss: GaugeVec,
    cost: GaugeVec,
    workers: IntGaugeVec,
}

impl PrometheusMetrics {
    /// Metrics registered on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let workers_launched = IntCounterVec::new(
            Opts::new(
                "stratus_workers_launched_total",
                "Workers launched to cover a fleet shortage",
            ),
            &["task"],
        )?;
        let launch_failures = IntCounterVec::new(
            Opts::new(
                "stratus_launch_failures_total",
                "Worker invocations that failed permanently",
            ),
            &["task"],
        )?;
        let probe_failures = IntCounterVec::new(
            Opts::new(
                "stratus_probe_failures_total",
                "Coordinator probes that got no valid answer",
            ),
            &["task"],
        )?;
        let tasks_stopped = IntCounterVec::new(
            Opts::new("stratus_tasks_stopped_total", "Experiments that reached Dead"),
            &["reason"],
        )?;
        let loss = GaugeVec::new(
            Opts::new("stratus_task_loss", "Latest loss reported by the coordinator"),
            &["task"],
        )?;
        let cost = GaugeVec::new(
            Opts::new("stratus_task_cost_dollars", "Estimated spend so far"),
            &["task"],
        )?;
        let workers = IntGaugeVec::new(
            Opts::new("stratus_task_workers", "Workers connected to the coordinator"),
            &["task"],
        )?;

        registry.register(Box::new(workers_launched.clone()))?;
        registry.register(Box::new(launch_failures.clone()))?;
        registry.register(Box::new(probe_failures.clone()))?;
        registry.register(Box::new(tasks_stopped.clone()))?;
        registry.register(Box::new(loss.clone()))?;
        registry.register(Box::new(cost.clone()))?;
        registry.register(Box::new(workers.clone()))?;

        Ok(Self {
            registry,
            workers_launched,
            launch_failures,
            probe_failures,
            tasks_stopped,
            loss,
            cost,
            workers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    /// Applies one event to the metrics.
    pub fn record(&self, event: &Event) {
        let Some(task) = event.task.map(|t| t.to_string()) else {
            return;
        };
        let label = [task.as_str()];

        match event.kind {
            EventKind::WorkersLaunched => {
                let n = u64::from(event.count.unwrap_or(0));
                self.workers_launched.with_label_values(&label).inc_by(n);
            }
            EventKind::LaunchFailed => self.launch_failures.with_label_values(&label).inc(),
            EventKind::ProbeFailed => self.probe_failures.with_label_values(&label).inc(),
            EventKind::MetricsPolled => {
                if let Some(loss) = event.loss {
                    self.loss.with_label_values(&label).set(loss);
                }
                if let Some(cost) = event.cost {
                    self.cost.with_label_values(&label).set(cost);
                }
                if let Some(n) = event.count {
                    self.workers.with_label_values(&label).set(i64::from(n));
                }
            }
            EventKind::TaskDead => {
                let reason = event.stop.map_or("unknown", |r| r.as_str());
                self.tasks_stopped.with_label_values(&[reason]).inc();
                if let Some(cost) = event.cost {
                    self.cost.with_label_values(&label).set(cost);
                }
                self.workers.with_label_values(&label).set(0);
            }
            _ => trace!(kind = ?event.kind, "event not exported"),
        }
    }
}

#[async_trait]
impl Subscribe for PrometheusMetrics {
    async fn on_event(&self, event: &Event) {
        self.record(event);
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }
}

#[cfg(test)]
mod tests {
    use stratus_model::{StopReason, TaskId};

    use super::*;

    fn metrics() -> PrometheusMetrics {
        PrometheusMetrics::new().unwrap()
    }

    #[test]
    fn launches_and_failures_are_counted_per_task() {
        let m = metrics();
        m.record(&Event::new(EventKind::WorkersLaunched).with_task(TaskId(1)).with_count(4));
        m.record(&Event::new(EventKind::WorkersLaunched).with_task(TaskId(1)).with_count(2));
        m.record(&Event::new(EventKind::LaunchFailed).with_task(TaskId(2)));

        assert_eq!(m.workers_launched.with_label_values(&["task-1"]).get(), 6);
        assert_eq!(m.launch_failures.with_label_values(&["task-2"]).get(), 1);
        assert_eq!(m.launch_failures.with_label_values(&["task-1"]).get(), 0);
    }

    #[test]
    fn polled_metrics_set_gauges() {
        let m = metrics();
        m.record(
            &Event::new(EventKind::MetricsPolled)
                .with_task(TaskId(0))
                .with_loss(0.42)
                .with_cost(1.5)
                .with_count(8),
        );
        assert_eq!(m.loss.with_label_values(&["task-0"]).get(), 0.42);
        assert_eq!(m.cost.with_label_values(&["task-0"]).get(), 1.5);
        assert_eq!(m.workers.with_label_values(&["task-0"]).get(), 8);
    }

    #[test]
    fn dead_task_counts_reason_and_zeroes_workers() {
        let m = metrics();
        m.record(&Event::new(EventKind::MetricsPolled).with_task(TaskId(0)).with_count(3));
        m.record(
            &Event::new(EventKind::TaskDead)
                .with_task(TaskId(0))
                .with_stop(StopReason::ThresholdReached)
                .with_cost(2.0),
        );
        assert_eq!(
            m.tasks_stopped
                .with_label_values(&[StopReason::ThresholdReached.as_str()])
                .get(),
            1
        );
        assert_eq!(m.workers.with_label_values(&["task-0"]).get(), 0);
        assert_eq!(m.cost.with_label_values(&["task-0"]).get(), 2.0);
    }

    #[test]
    fn grid_events_are_ignored() {
        let m = metrics();
        m.record(&Event::new(EventKind::GridStarted).with_count(3));
        assert!(!m.encode().unwrap().contains("task=\""));
    }

    #[test]
    fn encode_lists_metric_names() {
        let m = metrics();
        m.record(&Event::new(EventKind::ProbeFailed).with_task(TaskId(5)));
        let text = m.encode().unwrap();
        assert!(text.contains("stratus_probe_failures_total{task=\"task-5\"} 1"));
    }

    #[test]
    fn second_registration_on_same_registry_fails() {
        let registry = Registry::new();
        PrometheusMetrics::with_registry(registry.clone()).unwrap();
        assert!(PrometheusMetrics::with_registry(registry).is_err());
    }

    #[tokio::test]
    async fn subscriber_records_events() {
        let m = metrics();
        m.on_event(&Event::new(EventKind::ProbeFailed).with_task(TaskId(1)))
            .await;
        assert_eq!(m.probe_failures.with_label_values(&["task-1"]).get(), 1);
        assert_eq!(m.name(), "prometheus");
    }
}
