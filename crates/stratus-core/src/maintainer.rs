//! Worker fleet reconciliation loop.
//!
//! Every tick compares the desired worker count with the number of workers
//! the coordinator reports as connected and launches one invocation per
//! missing worker. The controller is level-triggered: it never tracks which
//! slot died, so under partial connectivity it may briefly over- or
//! under-shoot within a tick.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use stratus_exec::{LaunchReport, Launcher};
use stratus_model::{Invocation, TaskId, WorkerPayload};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::{
    events::{Event, EventBus, EventKind},
    platform::{Coordinator, Probe},
};

/// Sentinel stored in [`FleetMaintainer::observed`] before the first successful probe.
pub const UNOBSERVED: u32 = u32::MAX;

/// Workers to launch when `observed` of `desired` are connected.
pub fn shortage(desired: u32, observed: u32) -> u32 {
    desired.saturating_sub(observed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintainerExit {
    Stopped,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The coordinator could not be queried; nothing was launched.
    Unavailable,
    Satisfied { observed: u32 },
    Replenished { observed: u32, report: LaunchReport },
    /// A shortage was seen but the stop signal was already set.
    Cancelled { observed: u32 },
}

pub struct FleetMaintainer {
    task: TaskId,
    desired: u32,
    coordinator: Arc<dyn Coordinator>,
    probe: Arc<dyn Probe>,
    launcher: Launcher,
    events: EventBus,
    poll_interval: Duration,
    timeout: Option<Duration>,
    observed: Arc<AtomicU32>,
}

impl FleetMaintainer {
    pub fn new(
        task: TaskId,
        desired: u32,
        coordinator: Arc<dyn Coordinator>,
        probe: Arc<dyn Probe>,
        launcher: Launcher,
    ) -> Self {
        Self {
            task,
            desired,
            coordinator,
            probe,
            launcher,
            events: EventBus::default(),
            poll_interval: Duration::from_secs(1),
            timeout: None,
            observed: Arc::new(AtomicU32::new(UNOBSERVED)),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shares the last observed worker count with the owner.
    pub fn with_observed(mut self, observed: Arc<AtomicU32>) -> Self {
        self.observed = observed;
        self
    }

    /// Runs until `stop` fires or the timeout elapses.
    ///
    /// Takes up to one poll interval to notice `stop`. An in-flight launch
    /// barrier is not aborted, but it starts no new invocations once `stop` fires.
    #[instrument(level = "debug", skip_all, fields(task = %self.task, desired = self.desired))]
    pub async fn run(self, stop: CancellationToken) -> MaintainerExit {
        let started = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!("stop signal observed");
                    return MaintainerExit::Stopped;
                }
                _ = sleep(self.poll_interval) => {}
            }

            if let Some(timeout) = self.timeout
                && started.elapsed() >= timeout
            {
                info!(timeout_secs = timeout.as_secs(), "maintainer timed out");
                return MaintainerExit::TimedOut;
            }

            self.tick(&stop).await;
        }
    }

    pub async fn tick(&self, stop: &CancellationToken) -> TickOutcome {
        let observed = match self
            .probe
            .connected_workers(self.coordinator.control_addr())
            .await
        {
            Ok(n) => n,
            Err(e) => {
                trace!(error = %e, "liveness probe failed; skipping tick");
                self.events.publish(
                    Event::new(EventKind::ProbeFailed)
                        .with_task(self.task)
                        .with_reason(e.to_string()),
                );
                return TickOutcome::Unavailable;
            }
        };
        self.observed.store(observed, Ordering::Relaxed);

        let missing = shortage(self.desired, observed);
        if missing == 0 {
            trace!(observed, "fleet satisfied");
            return TickOutcome::Satisfied { observed };
        }
        if stop.is_cancelled() {
            return TickOutcome::Cancelled { observed };
        }

        debug!(observed, shortage = missing, "replenishing workers");
        let payload = WorkerPayload {
            task_id: self.task,
            num_workers: self.desired,
            coordinator_ip: self.coordinator.private_ip(),
            coordinator_port: self.coordinator.port(),
            dupe_nonce: 0,
        };
        let report = self
            .launcher
            .launch(0..missing, Some(stop), |_, nonce| {
                Invocation::Worker(WorkerPayload {
                    dupe_nonce: nonce,
                    ..payload.clone()
                })
            })
            .await;

        if report.launched > 0 {
            self.events.publish(
                Event::new(EventKind::WorkersLaunched)
                    .with_task(self.task)
                    .with_count(report.launched),
            );
        }
        for failure in &report.failures {
            self.events.publish(
                Event::new(EventKind::LaunchFailed)
                    .with_task(self.task)
                    .with_reason(failure.error.to_string()),
            );
        }
        TickOutcome::Replenished { observed, report }
    }
}

#[cfg(test)]
mod tests {
    use stratus_exec::{InvokeError, LaunchConfig};
    use stratus_model::RetryPolicy;

    use super::*;
    use crate::testing::{Call, CallLog, RecordingInvoker, StubCoordinator, StubProbe};

    struct Fixture {
        log: CallLog,
        probe: Arc<StubProbe>,
        invoker: Arc<RecordingInvoker>,
        maintainer: FleetMaintainer,
    }

    fn fixture(desired: u32) -> Fixture {
        let log = CallLog::default();
        let probe = Arc::new(StubProbe::default());
        let invoker = Arc::new(RecordingInvoker::new(log.clone()));
        let launcher = Launcher::new(
            invoker.clone(),
            LaunchConfig::default()
                .with_max_in_flight(4)
                .with_retry(RetryPolicy::immediate(3)),
        );
        let maintainer = FleetMaintainer::new(
            TaskId(7),
            desired,
            Arc::new(StubCoordinator::new(1337, log.clone())),
            probe.clone(),
            launcher,
        )
        .with_poll_interval(Duration::from_millis(100));
        Fixture {
            log,
            probe,
            invoker,
            maintainer,
        }
    }

    #[test]
    fn shortage_is_clamped_at_zero() {
        assert_eq!(shortage(10, 3), 7);
        assert_eq!(shortage(10, 10), 0);
        assert_eq!(shortage(10, 15), 0);
    }

    #[tokio::test]
    async fn launches_exactly_the_shortage() {
        for observed in [0, 3, 9, 10, 12] {
            let f = fixture(10);
            f.probe.set_connected(observed);

            let outcome = f.maintainer.tick(&CancellationToken::new()).await;
            let expected = shortage(10, observed) as usize;
            assert_eq!(f.log.invocations().len(), expected, "observed {observed}");
            if expected == 0 {
                assert_eq!(outcome, TickOutcome::Satisfied { observed });
            }
        }
    }

    #[tokio::test]
    async fn worker_payload_points_at_coordinator() {
        let f = fixture(2);
        f.probe.set_connected(1);
        f.maintainer.tick(&CancellationToken::new()).await;

        let invocations = f.log.invocations();
        let [Invocation::Worker(p)] = invocations.as_slice() else {
            panic!("expected one worker invocation, got {invocations:?}");
        };
        assert_eq!(p.task_id, TaskId(7));
        assert_eq!(p.num_workers, 2);
        assert_eq!(p.coordinator_port, 1337);
        assert_ne!(p.dupe_nonce, 0);
    }

    #[tokio::test]
    async fn probe_failure_skips_the_tick() {
        let f = fixture(5);
        f.probe.set_unreachable(true);
        let outcome = f.maintainer.tick(&CancellationToken::new()).await;
        assert_eq!(outcome, TickOutcome::Unavailable);
        assert!(f.log.invocations().is_empty());
    }

    #[tokio::test]
    async fn one_failed_slot_does_not_abort_the_others() {
        let f = fixture(4);
        f.probe.set_connected(0);
        f.invoker.fail_nth(1, InvokeError::Failed("boom".into()));

        let outcome = f.maintainer.tick(&CancellationToken::new()).await;
        let TickOutcome::Replenished { report, .. } = outcome else {
            panic!("expected replenish, got {outcome:?}");
        };
        assert_eq!(report.launched, 3);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn nothing_launched_once_stopped() {
        let f = fixture(4);
        f.probe.set_connected(0);
        let stop = CancellationToken::new();
        stop.cancel();
        let outcome = f.maintainer.tick(&stop).await;
        assert_eq!(outcome, TickOutcome::Cancelled { observed: 0 });
        assert!(f.log.invocations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_on_stop_signal_within_one_interval() {
        let f = fixture(1);
        f.probe.set_connected(1);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(f.maintainer.run(stop.clone()));

        sleep(Duration::from_millis(350)).await;
        let before = Instant::now();
        stop.cancel();
        assert_eq!(handle.await.unwrap(), MaintainerExit::Stopped);
        assert!(before.elapsed() <= Duration::from_millis(100));
        assert!(f.log.calls().iter().all(|c| !matches!(c, Call::Invoke(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out() {
        let f = fixture(1);
        f.probe.set_connected(1);
        let maintainer = f.maintainer.with_timeout(Some(Duration::from_millis(450)));
        let exit = maintainer.run(CancellationToken::new()).await;
        assert_eq!(exit, MaintainerExit::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn run_replenishes_every_tick_while_short() {
        let f = fixture(3);
        f.probe.set_connected(1);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(f.maintainer.run(stop.clone()));

        // ticks at 100, 200, 300ms
        sleep(Duration::from_millis(350)).await;
        stop.cancel();
        handle.await.unwrap();
        assert_eq!(f.log.invocations().len(), 6);
    }
}
