//! Concurrent multi-experiment scheduler.
//!
//! A grid search owns N tasks and K custodians. Custodian `i` polls the tasks
//! at indices `i, i+K, i+2K, ...`, sleeps between passes and applies the
//! tasks' timeout and loss-threshold limits. `kill_all` halts the custodians
//! first, then kills every task.
mod hyper;
pub use hyper::HyperGrid;

mod registry;
pub use registry::Registry;

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use stratus_exec::LaunchConfig;
use stratus_model::{Dollars, TaskSnapshot, TaskState};
use tokio::{
    task::{JoinHandle, JoinSet},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    clients::ClientFactory,
    error::{ClientKind, CoreError},
    events::{Event, EventBus, EventKind},
    platform::CommandHost,
    preprocess::preprocess,
    task::Task,
};

#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Custodian pool size; clamped to `1..=N`.
    pub custodians: usize,
    /// Sleep between two full passes of one custodian.
    pub pass_interval: Duration,
    /// Concurrency reserved for every experiment.
    pub per_task_capacity: u32,
    /// Preprocess every experiment's data chunks before any coordinator starts.
    pub preprocess: bool,
    /// Fan-out used for preprocessing.
    pub launch: LaunchConfig,
}

impl GridConfig {
    pub fn with_custodians(mut self, k: usize) -> Self {
        self.custodians = k;
        self
    }

    pub fn with_pass_interval(mut self, d: Duration) -> Self {
        self.pass_interval = d;
        self
    }

    pub fn with_per_task_capacity(mut self, c: u32) -> Self {
        self.per_task_capacity = c;
        self
    }

    pub fn with_preprocess(mut self, on: bool) -> Self {
        self.preprocess = on;
        self
    }

    pub fn with_launch(mut self, launch: LaunchConfig) -> Self {
        self.launch = launch;
        self
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            custodians: 4,
            pass_interval: Duration::from_secs(1),
            per_task_capacity: 100,
            preprocess: false,
            launch: LaunchConfig::default(),
        }
    }
}

pub struct GridSearch {
    id: Uuid,
    tasks: Vec<Arc<Task>>,
    hosts: Vec<Arc<dyn CommandHost>>,
    clients: Arc<ClientFactory>,
    events: EventBus,
    registry: Registry,
    cfg: GridConfig,
    /// Cancelled once the search must stop polling.
    halt: CancellationToken,
    started: AtomicBool,
    custodians: Mutex<Vec<JoinHandle<()>>>,
}

impl GridSearch {
    pub fn new(tasks: Vec<Task>, clients: Arc<ClientFactory>, cfg: GridConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            tasks: tasks.into_iter().map(Arc::new).collect(),
            hosts: Vec::new(),
            clients,
            events: EventBus::default(),
            registry: Registry::new(),
            cfg,
            halt: CancellationToken::new(),
            started: AtomicBool::new(false),
            custodians: Mutex::new(Vec::new()),
        }
    }

    /// Instances whose commands are buffered while the tasks are prepared.
    pub fn with_hosts(mut self, hosts: Vec<Arc<dyn CommandHost>>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.halt.is_cancelled()
    }

    /// Checks capacity, starts every task and spawns the custodians.
    ///
    /// Fails before any task is touched when the reserved capacity
    /// (`per_task_capacity * N`) exceeds what the account has available.
    /// A single task failing to start does not abort the others. The search is
    /// registered as soon as the capacity check passes, so a `kill_all` or
    /// [`Registry::stop_everything`] issued during startup reaches it.
    #[instrument(level = "info", skip(self), fields(grid = %self.id, tasks = self.tasks.len()))]
    pub async fn run(self: &Arc<Self>) -> Result<(), CoreError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyRunning);
        }
        self.check_capacity().await?;

        // Reachable by `stop_everything` before any coordinator starts.
        self.registry.register(Arc::clone(self));
        if self.halt.is_cancelled() {
            self.registry.remove(self.id);
            return Ok(());
        }

        if self.cfg.preprocess {
            let datasets = self.tasks.iter().map(|t| &t.spec().dataset);
            if let Err(e) =
                preprocess(datasets, &self.clients, &self.cfg.launch, Some(&self.halt)).await
            {
                self.registry.remove(self.id);
                return Err(e);
            }
            if self.halt.is_cancelled() {
                self.registry.remove(self.id);
                return Ok(());
            }
        }

        for host in &self.hosts {
            host.set_buffering(true);
        }
        let mut prepared = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            match task.prepare().await {
                Ok(()) => prepared.push(Arc::clone(task)),
                Err(e) => warn!(task = %task.id(), error = %e, "experiment not started"),
            }
        }
        self.flush_hosts().await;

        let mut set = JoinSet::new();
        for task in prepared {
            set.spawn(async move {
                let res = task.activate().await;
                (task.id(), res)
            });
        }
        let mut running = 0u32;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => running += 1,
                Ok((id, Err(e))) => warn!(task = %id, error = %e, "experiment failed to activate"),
                Err(e) => warn!(error = %e, "activation aborted"),
            }
        }

        if self.halt.is_cancelled() {
            debug!("halted during startup; custodians not spawned");
            self.registry.remove(self.id);
            return Ok(());
        }
        self.spawn_custodians();

        info!(running, "grid search running");
        self.events
            .publish(Event::new(EventKind::GridStarted).with_count(running));
        Ok(())
    }

    /// Stops polling, then kills every task and waits until all are dead.
    ///
    /// Returns the first teardown failure after every task was handled.
    #[instrument(level = "info", skip(self), fields(grid = %self.id))]
    pub async fn kill_all(&self) -> Result<(), CoreError> {
        self.halt.cancel();

        let custodians = std::mem::take(
            &mut *self
                .custodians
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in custodians {
            if let Err(e) = handle.await {
                warn!(error = %e, "custodian failed");
            }
        }

        let kills: Vec<_> = self
            .tasks
            .iter()
            .map(|task| {
                let task = Arc::clone(task);
                (task.id(), tokio::spawn(async move { task.kill().await }))
            })
            .collect();
        let mut first_err = None;
        for (id, handle) in kills {
            let res = handle.await.unwrap_or_else(|e| {
                Err(CoreError::Teardown {
                    task: id,
                    reason: format!("kill aborted: {e}"),
                })
            });
            if let Err(e) = res {
                warn!(task = %id, error = %e, "experiment teardown incomplete");
                first_err.get_or_insert(e);
            }
        }

        self.registry.remove(self.id);
        self.events
            .publish(Event::new(EventKind::GridStopped).with_cost(self.total_cost()));
        info!("grid search stopped");
        first_err.map_or(Ok(()), Err)
    }

    pub async fn kill(&self, index: usize) -> Result<(), CoreError> {
        self.tasks
            .get(index)
            .ok_or(CoreError::NoSuchExperiment(index))?
            .kill()
            .await
    }

    /// Indices ranked by latest loss, best first.
    ///
    /// `n > 0` returns the `n` best, `n < 0` the `|n|` worst (worst first) and
    /// `0` all of them. Experiments without a loss yet are skipped.
    pub fn get_top(&self, n: i64) -> Vec<usize> {
        let losses: Vec<_> = self.tasks.iter().map(|t| t.last_loss()).collect();
        rank_by_loss(&losses, n)
    }

    pub fn total_cost(&self) -> Dollars {
        self.tasks.iter().map(|t| t.cost()).sum()
    }

    pub fn cost_per_second(&self) -> Dollars {
        self.tasks.iter().map(|t| t.cost_per_second()).sum()
    }

    pub fn snapshot(&self, index: usize) -> Option<TaskSnapshot> {
        self.tasks.get(index).map(|t| t.snapshot())
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|t| t.snapshot()).collect()
    }

    async fn check_capacity(&self) -> Result<(), CoreError> {
        let tasks = self.tasks.len();
        let per_task = self.cfg.per_task_capacity;
        let required = u64::from(per_task) * tasks as u64;

        let available = self
            .clients
            .capacity()
            .await?
            .available_concurrency()
            .await
            .map_err(|e| CoreError::Client {
                kind: ClientKind::Capacity,
                reason: e.to_string(),
            })?;

        if required > u64::from(available) {
            return Err(CoreError::InsufficientCapacity {
                tasks,
                per_task,
                required,
                available,
            });
        }
        debug!(required, available, "capacity check passed");
        Ok(())
    }

    async fn flush_hosts(&self) {
        let mut set = JoinSet::new();
        for host in &self.hosts {
            let host = Arc::clone(host);
            set.spawn(async move {
                host.set_buffering(false);
                let res = host.flush().await;
                (host.name().to_string(), res)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((host, Err(e))) => warn!(host, error = %e, "flushing buffered commands failed"),
                Err(e) => warn!(error = %e, "flush aborted"),
            }
        }
    }

    fn spawn_custodians(self: &Arc<Self>) {
        let n = self.tasks.len();
        if n == 0 {
            return;
        }
        let k = self.cfg.custodians.clamp(1, n);
        let handles = (0..k)
            .map(|i| tokio::spawn(custodian(Arc::clone(self), i, k)))
            .collect();
        *self
            .custodians
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handles;
    }
}

async fn custodian(grid: Arc<GridSearch>, first: usize, stride: usize) {
    debug!(grid = %grid.id, custodian = first, "custodian started");
    loop {
        for task in grid.tasks.iter().skip(first).step_by(stride) {
            if grid.halt.is_cancelled() {
                return;
            }
            if task.state() != TaskState::Running {
                continue;
            }
            task.poll_metrics().await;

            if let Some(reason) = task.check_limits() {
                info!(task = %task.id(), reason = reason.as_str(), "experiment reached its limit");
                let task = Arc::clone(task);
                tokio::spawn(async move {
                    if let Err(e) = task.stop(reason).await {
                        warn!(task = %task.id(), error = %e, "stopping experiment failed");
                    }
                });
            }
        }

        tokio::select! {
            _ = grid.halt.cancelled() => return,
            _ = sleep(grid.cfg.pass_interval) => {}
        }
    }
}

fn rank_by_loss(losses: &[Option<f64>], n: i64) -> Vec<usize> {
    let mut ranked: Vec<(usize, f64)> = losses
        .iter()
        .enumerate()
        .filter_map(|(i, l)| l.map(|l| (i, l)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let take = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
    let indices = ranked.into_iter().map(|(i, _)| i);
    match n {
        0 => indices.collect(),
        n if n > 0 => indices.take(take).collect(),
        _ => indices.rev().take(take).collect(),
    }
}
