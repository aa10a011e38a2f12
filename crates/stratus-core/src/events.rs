//! Lifecycle and fleet events fanned out to pluggable subscribers.
//!
//! Every subscriber owns a bounded queue drained by its own worker task, so a
//! slow subscriber never blocks the control loops. When a queue is full the
//! event is dropped for that subscriber only.
use std::{sync::Arc, time::SystemTime};

use async_trait::async_trait;
use stratus_model::{StopReason, TaskId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // grid
    GridStarted,
    GridStopped,

    // lifecycle
    TaskStarting,
    TaskRunning,
    TaskStartFailed,
    TaskStopping,
    TaskDead,
    TeardownFailed,

    // fleet
    WorkersLaunched,
    LaunchFailed,
    ProbeFailed,
    MetricsPolled,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub at: SystemTime,
    pub task: Option<TaskId>,
    pub reason: Option<String>,
    pub stop: Option<StopReason>,
    pub count: Option<u32>,
    pub loss: Option<f64>,
    pub cost: Option<f64>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            at: SystemTime::now(),
            task: None,
            reason: None,
            stop: None,
            count: None,
            loss: None,
            cost: None,
        }
    }

    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_stop(mut self, stop: StopReason) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = Some(loss);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    fn name(&self) -> &'static str;

    fn queue_capacity(&self) -> usize {
        1024
    }
}

struct Sink {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Cloneable publisher handle.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<Vec<Sink>>,
}

impl EventBus {
    /// Spawns one delivery worker per subscriber; must be called inside a Tokio runtime.
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let sinks = subscribers
            .into_iter()
            .map(|sub| {
                let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
                let name = sub.name();
                tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        sub.on_event(&ev).await;
                    }
                    trace!(subscriber = sub.name(), "event worker finished");
                });
                Sink { name, tx }
            })
            .collect();
        Self {
            sinks: Arc::new(sinks),
        }
    }

    pub fn publish(&self, event: Event) {
        if self.sinks.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for sink in self.sinks.iter() {
            match sink.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(ev)) => {
                    warn!(subscriber = sink.name, kind = ?ev.kind, "subscriber queue full, event dropped")
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(subscriber = sink.name, "subscriber worker gone")
                }
            }
        }
    }
}
