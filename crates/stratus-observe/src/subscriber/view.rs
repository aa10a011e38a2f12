use std::borrow::Borrow;

use stratus_core::{Event, EventKind};
use tracing::{debug, error, info, trace, warn};

/// Field accessors with log-friendly fallbacks for absent values.
pub trait View {
    fn kind(&self) -> EventKind;
    fn as_task(&self) -> String;
    fn as_reason(&self) -> &str;
    fn as_stop(&self) -> &'static str;
    fn count(&self) -> u32;
    fn loss(&self) -> f64;
    fn cost(&self) -> f64;
}

impl<T> View for T
where
    T: Borrow<Event>,
{
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
    #[inline]
    fn as_task(&self) -> String {
        self.borrow()
            .task
            .map_or_else(|| "grid".to_string(), |t| t.to_string())
    }
    #[inline]
    fn as_reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
    #[inline]
    fn as_stop(&self) -> &'static str {
        self.borrow().stop.map_or("none", |s| s.as_str())
    }
    #[inline]
    fn count(&self) -> u32 {
        self.borrow().count.unwrap_or(0)
    }
    #[inline]
    fn loss(&self) -> f64 {
        self.borrow().loss.unwrap_or(f64::NAN)
    }
    #[inline]
    fn cost(&self) -> f64 {
        self.borrow().cost.unwrap_or(0.0)
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // grid
        EventKind::GridStarted => "grid search started; custodians running",
        EventKind::GridStopped => "grid search stopped; every experiment is dead",

        // lifecycle
        EventKind::TaskStarting => "experiment starting (coordinator launch requested)",
        EventKind::TaskRunning => "experiment running; fleet maintainer active",
        EventKind::TaskStartFailed => "experiment failed to start",
        EventKind::TaskStopping => "experiment stopping",
        EventKind::TaskDead => "experiment dead",
        EventKind::TeardownFailed => "coordinator teardown failed; manual cleanup may be required",

        // fleet
        EventKind::WorkersLaunched => "workers launched to cover a shortage",
        EventKind::LaunchFailed => "worker launch failed",
        EventKind::ProbeFailed => "coordinator did not answer a probe",
        EventKind::MetricsPolled => "metrics polled",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        // grid
        EventKind::GridStarted => info!(experiments = e.count(), "{msg}"),
        EventKind::GridStopped => info!(cost = e.cost(), "{msg}"),

        // lifecycle
        EventKind::TaskStarting => info!(task = %e.as_task(), "{msg}"),
        EventKind::TaskRunning => info!(task = %e.as_task(), workers = e.count(), "{msg}"),
        EventKind::TaskStartFailed => {
            error!(task = %e.as_task(), reason = e.as_reason(), "{msg}")
        }
        EventKind::TaskStopping => info!(task = %e.as_task(), stop = e.as_stop(), "{msg}"),
        EventKind::TaskDead => {
            info!(task = %e.as_task(), stop = e.as_stop(), cost = e.cost(), "{msg}")
        }
        EventKind::TeardownFailed => {
            error!(task = %e.as_task(), reason = e.as_reason(), "{msg}")
        }

        // fleet
        EventKind::WorkersLaunched => debug!(task = %e.as_task(), count = e.count(), "{msg}"),
        EventKind::LaunchFailed => {
            warn!(task = %e.as_task(), count = e.count(), reason = e.as_reason(), "{msg}")
        }
        EventKind::ProbeFailed => {
            debug!(task = %e.as_task(), reason = e.as_reason(), "{msg}")
        }
        EventKind::MetricsPolled => {
            trace!(task = %e.as_task(), loss = e.loss(), cost = e.cost(), "{msg}")
        }
    }
}
