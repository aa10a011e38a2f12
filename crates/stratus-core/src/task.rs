//! One experiment: coordinator, worker fleet, metric history and cost.
//!
//! ```text
//! created -> starting -> running -> {timed_out | threshold_reached | killed} -> dead
//! ```
//!
//! Stopping is strictly ordered: the stop signal fires first (no further
//! worker launches), then the coordinator is stopped, then the task waits a
//! grace period for already-launched workers to notice and exit. Once dead
//! every getter returns frozen history.
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use stratus_exec::{LaunchConfig, Launcher};
use stratus_model::{
    ConfigDocument, CostModel, Dollars, MetricKind, MetricPoint, MetricSeries, StopReason,
    TaskId, TaskSnapshot, TaskSpec, TaskState,
};
use tokio::{
    task::JoinHandle,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    clients::ClientFactory,
    error::CoreError,
    events::{Event, EventBus, EventKind},
    maintainer::{FleetMaintainer, MaintainerExit, UNOBSERVED},
    platform::{Coordinator, Probe},
};

#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Fleet maintainer tick.
    pub poll_interval: Duration,
    /// Wait after stopping the coordinator so launched workers can exit.
    pub grace: Duration,
    /// How long to wait for a freshly started coordinator to answer.
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
    /// Per-task concurrency quota; larger worker counts are refused at start.
    pub worker_quota: u32,
    pub launch: LaunchConfig,
}

impl TaskSettings {
    pub fn with_poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn with_grace(mut self, d: Duration) -> Self {
        self.grace = d;
        self
    }

    pub fn with_ready_timeout(mut self, d: Duration) -> Self {
        self.ready_timeout = d;
        self
    }

    pub fn with_worker_quota(mut self, quota: u32) -> Self {
        self.worker_quota = quota;
        self
    }

    pub fn with_launch(mut self, launch: LaunchConfig) -> Self {
        self.launch = launch;
        self
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(120),
            ready_poll: Duration::from_millis(500),
            worker_quota: 1000,
            launch: LaunchConfig::default(),
        }
    }
}

/// Collaborators shared by every task of a run.
#[derive(Clone)]
pub struct TaskContext {
    pub probe: Arc<dyn Probe>,
    pub clients: Arc<ClientFactory>,
    pub events: EventBus,
    pub settings: TaskSettings,
}

impl TaskContext {
    pub fn new(probe: Arc<dyn Probe>, clients: Arc<ClientFactory>) -> Self {
        Self {
            probe,
            clients,
            events: EventBus::default(),
            settings: TaskSettings::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_settings(mut self, settings: TaskSettings) -> Self {
        self.settings = settings;
        self
    }
}

enum StopStep {
    Done,
    /// Never started: nothing to tear down.
    Discard,
    /// Another caller is tearing down.
    Wait,
    Teardown,
}

struct TaskInner {
    state: TaskState,
    stop_reason: Option<StopReason>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    series: BTreeMap<MetricKind, MetricSeries>,
    /// Local elapsed seconds and update count of the previous sample.
    last_updates: Option<(f64, u64)>,
    maintainer: Option<JoinHandle<MaintainerExit>>,
}

pub struct Task {
    id: TaskId,
    spec: TaskSpec,
    config: ConfigDocument,
    cost_model: CostModel,
    coordinator: Arc<dyn Coordinator>,
    ctx: TaskContext,
    stop: CancellationToken,
    dead: CancellationToken,
    observed: Arc<AtomicU32>,
    inner: Mutex<TaskInner>,
}

impl Task {
    /// Validates `spec` and renders its configuration up front.
    pub fn new(
        id: TaskId,
        spec: TaskSpec,
        coordinator: Arc<dyn Coordinator>,
        ctx: TaskContext,
    ) -> Result<Self, CoreError> {
        spec.validate()?;
        let config = spec.algorithm.render(&spec)?;
        let cost_model = CostModel::for_spec(&spec)?;
        Ok(Self {
            id,
            spec,
            config,
            cost_model,
            coordinator,
            ctx,
            stop: CancellationToken::new(),
            dead: CancellationToken::new(),
            observed: Arc::new(AtomicU32::new(UNOBSERVED)),
            inner: Mutex::new(TaskInner {
                state: TaskState::Created,
                stop_reason: None,
                started_at: None,
                stopped_at: None,
                series: BTreeMap::new(),
                last_updates: None,
                maintainer: None,
            }),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn configuration(&self) -> &ConfigDocument {
        &self.config
    }

    pub fn state(&self) -> TaskState {
        self.inner().state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner().stop_reason
    }

    pub fn is_dead(&self) -> bool {
        self.inner().state.is_dead()
    }

    /// Fires when the task begins stopping. Never reset.
    pub fn stop_signal(&self) -> &CancellationToken {
        &self.stop
    }

    /// Completes once the task is fully dead.
    pub async fn wait_dead(&self) {
        self.dead.cancelled().await
    }

    /// Runs [`prepare`](Self::prepare) then [`activate`](Self::activate).
    pub async fn start(&self) -> Result<(), CoreError> {
        self.prepare().await?;
        self.activate().await
    }

    /// Checks the worker quota and asks the coordinator to start.
    ///
    /// Fails without side effects when the requested worker count exceeds the
    /// per-task quota.
    #[instrument(level = "info", skip(self), fields(task = %self.id))]
    pub async fn prepare(&self) -> Result<(), CoreError> {
        self.transition(TaskState::Starting)?;
        self.ctx
            .events
            .publish(Event::new(EventKind::TaskStarting).with_task(self.id));

        let requested = self.spec.num_workers;
        let limit = self.ctx.settings.worker_quota;
        if requested > limit {
            let available = self.available_concurrency().await;
            let err = CoreError::Capacity {
                task: self.id,
                requested,
                limit,
                available,
            };
            self.fail_startup(&err, false).await;
            return Err(err);
        }

        if let Err(e) = self.coordinator.start(&self.config).await {
            let err = CoreError::Coordinator(e);
            self.fail_startup(&err, false).await;
            return Err(err);
        }
        debug!(workers = requested, "coordinator start requested");
        Ok(())
    }

    /// Waits for the coordinator to answer, then starts the fleet maintainer.
    #[instrument(level = "info", skip(self), fields(task = %self.id))]
    pub async fn activate(&self) -> Result<(), CoreError> {
        {
            let inner = self.inner();
            if inner.state != TaskState::Starting {
                return Err(self.not_starting(inner.state));
            }
        }

        if let Err(err) = self.wait_reachable().await {
            self.fail_startup(&err, true).await;
            return Err(err);
        }
        let invoker = match self.ctx.clients.invoker().await {
            Ok(invoker) => invoker,
            Err(err) => {
                self.fail_startup(&err, true).await;
                return Err(err);
            }
        };

        let settings = &self.ctx.settings;
        let maintainer = FleetMaintainer::new(
            self.id,
            self.spec.num_workers,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.ctx.probe),
            Launcher::new(invoker, settings.launch.clone()),
        )
        .with_events(self.ctx.events.clone())
        .with_poll_interval(settings.poll_interval)
        .with_timeout(self.spec.timeout_secs.map(Duration::from_secs))
        .with_observed(Arc::clone(&self.observed));

        {
            let mut inner = self.inner();
            if inner.state != TaskState::Starting {
                return Err(self.not_starting(inner.state));
            }
            inner.state = TaskState::Running;
            inner.started_at = Some(Instant::now());
            inner.maintainer = Some(tokio::spawn(maintainer.run(self.stop.clone())));
        }

        info!(workers = self.spec.num_workers, "task running");
        self.ctx
            .events
            .publish(Event::new(EventKind::TaskRunning).with_task(self.id));
        Ok(())
    }

    /// Samples the coordinator and extends the metric series.
    ///
    /// Unreachable coordinators and malformed replies leave the cached series
    /// untouched. Returns whether any point was appended; always `false` once
    /// the task is no longer running.
    pub async fn poll_metrics(&self) -> bool {
        if self.state() != TaskState::Running {
            return false;
        }

        let probe = &self.ctx.probe;
        let time_loss = probe.last_time_and_loss(self.coordinator.metrics_addr()).await;
        let updates = probe.update_count(self.coordinator.control_addr()).await;

        let mut inner = self.inner();
        if inner.state != TaskState::Running {
            return false;
        }
        let elapsed = elapsed_of(&inner).as_secs_f64();
        let cost = self.cost_model.cost_per_second() * elapsed;
        let mut appended = false;
        let mut loss = None;

        match time_loss {
            Ok((time, value)) => {
                if push(&mut inner, MetricKind::Loss, time, value) {
                    appended = true;
                    push(&mut inner, MetricKind::LossVsCost, cost, value);
                    if cost > 0.0 {
                        push(&mut inner, MetricKind::LossPerDollar, time, value / cost);
                    }
                }
                appended |= push(
                    &mut inner,
                    MetricKind::CostPerSecond,
                    time,
                    self.cost_model.cost_per_second(),
                );
                loss = Some(value);
            }
            Err(e) => {
                debug!(task = %self.id, error = %e, "metrics unavailable");
                self.ctx.events.publish(
                    Event::new(EventKind::ProbeFailed)
                        .with_task(self.id)
                        .with_reason(e.to_string()),
                );
            }
        }

        // The rate covers the span since the count last moved.
        if let Ok(count) = updates {
            match inner.last_updates {
                Some((prev_at, prev_count)) if count != prev_count && elapsed > prev_at => {
                    let rate = count.saturating_sub(prev_count) as f64 / (elapsed - prev_at);
                    appended |= push(&mut inner, MetricKind::UpdatesPerSecond, elapsed, rate);
                    inner.last_updates = Some((elapsed, count));
                }
                Some(_) => {}
                None => inner.last_updates = Some((elapsed, count)),
            }
        }

        let observed = self.observed.load(Ordering::Relaxed);
        if observed != UNOBSERVED {
            let workers = f64::from(observed);
            let changed = inner
                .series
                .get(&MetricKind::Workers)
                .and_then(MetricSeries::last)
                .is_none_or(|p| p.y != workers);
            if changed {
                appended |= push(&mut inner, MetricKind::Workers, elapsed, workers);
            }
        }
        drop(inner);

        let mut ev = Event::new(EventKind::MetricsPolled)
            .with_task(self.id)
            .with_cost(cost);
        if let Some(loss) = loss {
            ev = ev.with_loss(loss);
        }
        if observed != UNOBSERVED {
            ev = ev.with_count(observed);
        }
        self.ctx.events.publish(ev);
        appended
    }

    /// Reason the running task should stop now, if any.
    pub fn check_limits(&self) -> Option<StopReason> {
        let inner = self.inner();
        if inner.state != TaskState::Running {
            return None;
        }
        if let Some(secs) = self.spec.timeout_secs
            && elapsed_of(&inner) >= Duration::from_secs(secs)
        {
            return Some(StopReason::TimedOut);
        }
        if let Some(threshold) = self.spec.loss_threshold
            && let Some(last) = inner.series.get(&MetricKind::Loss).and_then(MetricSeries::last)
            && last.y <= threshold
        {
            return Some(StopReason::ThresholdReached);
        }
        None
    }

    pub async fn kill(&self) -> Result<(), CoreError> {
        self.stop(StopReason::Killed).await
    }

    /// Stops the task for `reason` and returns once it is dead.
    ///
    /// Concurrent callers all wait for the first one to finish. Coordinator
    /// teardown failures are reported, not retried.
    #[instrument(level = "info", skip(self), fields(task = %self.id, reason = reason.as_str()))]
    pub async fn stop(&self, reason: StopReason) -> Result<(), CoreError> {
        let next = TaskState::stopping(reason);
        let step = {
            let mut inner = self.inner();
            match inner.state {
                TaskState::Dead => StopStep::Done,
                TaskState::Created => {
                    inner.state = TaskState::Dead;
                    inner.stop_reason = Some(reason);
                    StopStep::Discard
                }
                s if s.is_stopping() => StopStep::Wait,
                s if s.can_transition(next) => {
                    inner.state = next;
                    inner.stop_reason = Some(reason);
                    inner.stopped_at = Some(Instant::now());
                    StopStep::Teardown
                }
                s => {
                    return Err(CoreError::InvalidTransition {
                        task: self.id,
                        from: s,
                        to: next,
                    });
                }
            }
        };
        match step {
            StopStep::Done => return Ok(()),
            StopStep::Discard => {
                self.stop.cancel();
                self.dead.cancel();
                return Ok(());
            }
            StopStep::Wait => {
                self.dead.cancelled().await;
                return Ok(());
            }
            StopStep::Teardown => {}
        }
        self.ctx.events.publish(
            Event::new(EventKind::TaskStopping)
                .with_task(self.id)
                .with_stop(reason),
        );

        self.stop.cancel();
        let teardown = self.coordinator.stop().await;
        if let Err(e) = &teardown {
            warn!(error = %e, "coordinator stop failed; manual cleanup may be required");
            self.ctx.events.publish(
                Event::new(EventKind::TeardownFailed)
                    .with_task(self.id)
                    .with_reason(e.to_string()),
            );
        }
        sleep(self.ctx.settings.grace).await;

        let maintainer = self.inner().maintainer.take();
        if let Some(handle) = maintainer {
            match handle.await {
                Ok(exit) => debug!(?exit, "maintainer joined"),
                Err(e) => warn!(error = %e, "maintainer task failed"),
            }
        }

        self.bury(reason);
        teardown.map_err(|e| CoreError::Teardown {
            task: self.id,
            reason: e.to_string(),
        })
    }

    /// Time spent running; frozen once the task stops.
    pub fn elapsed(&self) -> Duration {
        elapsed_of(&self.inner())
    }

    pub fn cost(&self) -> Dollars {
        self.cost_model.cost(self.elapsed())
    }

    /// Current spend rate; zero unless the task is running.
    pub fn cost_per_second(&self) -> Dollars {
        if self.state() == TaskState::Running {
            self.cost_model.cost_per_second()
        } else {
            0.0
        }
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.inner()
            .series
            .get(&MetricKind::Loss)
            .and_then(MetricSeries::last)
            .map(|p| p.y)
    }

    pub fn series(&self, kind: MetricKind) -> Vec<MetricPoint> {
        self.inner()
            .series
            .get(&kind)
            .map(|s| s.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.inner();
        let elapsed = elapsed_of(&inner);
        let observed = self.observed.load(Ordering::Relaxed);
        TaskSnapshot {
            id: self.id,
            name: self.spec.name.clone(),
            algorithm: self.spec.algorithm.name().to_string(),
            state: inner.state,
            stop_reason: inner.stop_reason,
            num_workers: self.spec.num_workers,
            elapsed: elapsed.as_secs_f64(),
            cost: self.cost_model.cost(elapsed),
            cost_per_second: if inner.state == TaskState::Running {
                self.cost_model.cost_per_second()
            } else {
                0.0
            },
            connected_workers: (observed != UNOBSERVED).then_some(observed),
            last_loss: inner
                .series
                .get(&MetricKind::Loss)
                .and_then(MetricSeries::last)
                .map(|p| p.y),
            series: inner
                .series
                .iter()
                .map(|(k, s)| (*k, s.as_slice().to_vec()))
                .collect(),
        }
    }

    fn inner(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: TaskState) -> Result<(), CoreError> {
        let mut inner = self.inner();
        if !inner.state.can_transition(next) {
            return Err(CoreError::InvalidTransition {
                task: self.id,
                from: inner.state,
                to: next,
            });
        }
        inner.state = next;
        Ok(())
    }

    fn not_starting(&self, state: TaskState) -> CoreError {
        if state.is_stopping() || state.is_dead() {
            CoreError::Stopped(self.id)
        } else {
            CoreError::InvalidTransition {
                task: self.id,
                from: state,
                to: TaskState::Running,
            }
        }
    }

    async fn available_concurrency(&self) -> Option<u32> {
        let probe = self.ctx.clients.capacity().await.ok()?;
        probe.available_concurrency().await.ok()
    }

    async fn wait_reachable(&self) -> Result<(), CoreError> {
        let deadline = Instant::now() + self.ctx.settings.ready_timeout;
        let addr = self.coordinator.control_addr();
        loop {
            if self.stop.is_cancelled() {
                return Err(CoreError::Stopped(self.id));
            }
            match self.ctx.probe.connected_workers(addr).await {
                Ok(_) => return Ok(()),
                Err(e) => debug!(task = %self.id, error = %e, "coordinator not reachable yet"),
            }
            if Instant::now() >= deadline {
                return Err(CoreError::CoordinatorUnreachable(self.id));
            }
            tokio::select! {
                _ = self.stop.cancelled() => {}
                _ = sleep(self.ctx.settings.ready_poll) => {}
            }
        }
    }

    /// Aborts a startup that has not launched any worker.
    ///
    /// A concurrent stop owns the teardown; this only waits for it.
    async fn fail_startup(&self, err: &CoreError, coordinator_started: bool) {
        let owned = {
            let mut inner = self.inner();
            let owned = inner.state == TaskState::Starting;
            if owned {
                inner.state = TaskState::Failed;
                inner.stop_reason = Some(StopReason::StartupFailed);
            }
            owned
        };
        if !owned {
            self.dead.cancelled().await;
            return;
        }
        warn!(task = %self.id, error = %err, "task startup failed");
        self.ctx.events.publish(
            Event::new(EventKind::TaskStartFailed)
                .with_task(self.id)
                .with_reason(err.to_string()),
        );

        self.stop.cancel();
        if coordinator_started && let Err(e) = self.coordinator.stop().await {
            warn!(task = %self.id, error = %e, "coordinator stop failed; manual cleanup may be required");
            self.ctx.events.publish(
                Event::new(EventKind::TeardownFailed)
                    .with_task(self.id)
                    .with_reason(e.to_string()),
            );
        }
        self.bury(StopReason::StartupFailed);
    }

    fn bury(&self, reason: StopReason) {
        self.inner().state = TaskState::Dead;
        self.dead.cancel();
        info!(task = %self.id, reason = reason.as_str(), "task dead");
        self.ctx.events.publish(
            Event::new(EventKind::TaskDead)
                .with_task(self.id)
                .with_stop(reason)
                .with_cost(self.cost()),
        );
    }
}

fn elapsed_of(inner: &TaskInner) -> Duration {
    match (inner.started_at, inner.stopped_at) {
        (Some(start), Some(stop)) => stop.saturating_duration_since(start),
        (Some(start), None) => start.elapsed(),
        _ => Duration::ZERO,
    }
}

fn push(inner: &mut TaskInner, kind: MetricKind, x: f64, y: f64) -> bool {
    inner.series.entry(kind).or_default().push(x, y)
}
