use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use stratus_core::{GridConfig, HyperGrid, TaskSettings};
use stratus_exec::{
    LaunchConfig,
    local::DEFAULT_NONCE_WINDOW,
    proc::ProcConfig,
};
use stratus_messenger::MessengerConfig;
use stratus_observe::LoggerConfig;

/// Daemon configuration, loaded from one JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GriddConfig {
    #[serde(default)]
    pub logger: LoggerConfig,
    /// HTTP API and `/metrics` listener.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    pub grid: HyperGrid,
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Parameter-server executable; experiment `i` listens on `base_port + i`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// SIGTERM-to-SIGKILL delay when the coordinator is stopped.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    #[serde(default = "default_ip")]
    pub ip: IpAddr,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Recent nonces remembered for duplicate rejection.
    #[serde(default = "default_nonce_window")]
    pub nonce_window: usize,
    /// Local concurrency limit; invocations above it are throttled.
    #[serde(default = "default_max_running")]
    pub max_running: usize,
    #[serde(default = "default_true")]
    pub disable_core_dumps: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub custodians: usize,
    /// Fan preprocessing out over the data chunks before starting coordinators.
    pub preprocess: bool,
    pub pass_interval_ms: u64,
    pub per_task_capacity: u32,
    pub poll_interval_ms: u64,
    pub grace_secs: u64,
    pub ready_timeout_secs: u64,
    pub worker_quota: u32,
    pub max_in_flight: usize,
    pub probe_timeout_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let grid = GridConfig::default();
        let task = TaskSettings::default();
        Self {
            custodians: grid.custodians,
            preprocess: grid.preprocess,
            pass_interval_ms: millis(grid.pass_interval),
            per_task_capacity: grid.per_task_capacity,
            poll_interval_ms: millis(task.poll_interval),
            grace_secs: task.grace.as_secs(),
            ready_timeout_secs: task.ready_timeout.as_secs(),
            worker_quota: task.worker_quota,
            max_in_flight: task.launch.max_in_flight,
            probe_timeout_ms: millis(MessengerConfig::default().timeout),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080)
}

fn default_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_base_port() -> u16 {
    5000
}

fn default_kill_grace_secs() -> u64 {
    5
}

fn default_nonce_window() -> usize {
    DEFAULT_NONCE_WINDOW
}

fn default_max_running() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl GriddConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.check()?;
        Ok(cfg)
    }

    fn check(&self) -> anyhow::Result<()> {
        let points = self.grid.point_count();
        let last = u32::from(self.coordinator.base_port) + u32::try_from(points)?;
        anyhow::ensure!(
            last <= u32::from(u16::MAX),
            "{points} experiments do not fit above port {}",
            self.coordinator.base_port
        );
        anyhow::ensure!(
            !self.coordinator.program.trim().is_empty(),
            "coordinator.program is empty"
        );
        anyhow::ensure!(!self.worker.program.trim().is_empty(), "worker.program is empty");
        Ok(())
    }

    pub fn grid_config(&self) -> GridConfig {
        GridConfig::default()
            .with_custodians(self.schedule.custodians)
            .with_pass_interval(Duration::from_millis(self.schedule.pass_interval_ms))
            .with_per_task_capacity(self.schedule.per_task_capacity)
            .with_preprocess(self.schedule.preprocess)
            .with_launch(self.launch_config())
    }

    fn launch_config(&self) -> LaunchConfig {
        LaunchConfig::default().with_max_in_flight(self.schedule.max_in_flight)
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings::default()
            .with_poll_interval(Duration::from_millis(self.schedule.poll_interval_ms))
            .with_grace(Duration::from_secs(self.schedule.grace_secs))
            .with_ready_timeout(Duration::from_secs(self.schedule.ready_timeout_secs))
            .with_worker_quota(self.schedule.worker_quota)
            .with_launch(self.launch_config())
    }

    pub fn messenger_config(&self) -> MessengerConfig {
        MessengerConfig::default()
            .with_timeout(Duration::from_millis(self.schedule.probe_timeout_ms))
    }

    pub fn worker_proc(&self) -> ProcConfig {
        let mut proc = with_env(ProcConfig::new(&self.worker.program), &self.worker.env);
        proc.args = self.worker.args.clone();
        proc.disable_core_dumps = self.worker.disable_core_dumps;
        proc
    }

    pub fn coordinator_proc(&self) -> ProcConfig {
        let mut proc = with_env(ProcConfig::new(&self.coordinator.program), &self.coordinator.env)
            .with_kill_grace(Duration::from_secs(self.coordinator.kill_grace_secs));
        proc.args = self.coordinator.args.clone();
        proc
    }
}

fn with_env(proc: ProcConfig, env: &BTreeMap<String, String>) -> ProcConfig {
    env.iter().fold(proc, |proc, (k, v)| proc.with_env(k, v))
}

#[cfg(test)]
mod tests {
    use stratus_observe::LoggerFormat;

    use super::*;

    const SAMPLE: &str = r#"{
        "logger": { "format": "json", "level": "debug" },
        "grid": {
            "base": {
                "name": "criteo",
                "numWorkers": 4,
                "learningRate": 0.01,
                "epsilon": 0.0001,
                "minibatchSize": 20,
                "modelBits": 19,
                "dataset": { "bucket": "criteo-kaggle", "trainSet": [0, 824], "testSet": [825, 840] },
                "algorithm": { "type": "logisticRegression", "numFeatures": 13 }
            },
            "learningRates": [0.01, 0.001],
            "workerCounts": [2, 4, 8]
        },
        "coordinator": { "program": "/opt/cirrus/parameter_server", "basePort": 6000 },
        "worker": {
            "program": "/opt/cirrus/worker",
            "maxRunning": 64,
            "env": { "CIRRUS_BUCKET": "criteo-kaggle", "RUST_LOG": "info" }
        },
        "schedule": { "custodians": 2, "graceSecs": 3, "preprocess": true }
    }"#;

    #[test]
    fn parses_sample_and_fills_defaults() {
        let cfg: GriddConfig = serde_json::from_str(SAMPLE).unwrap();
        cfg.check().unwrap();

        assert_eq!(cfg.logger.format, LoggerFormat::Json);
        assert_eq!(cfg.listen, default_listen());
        assert_eq!(cfg.grid.point_count(), 6);
        assert_eq!(cfg.coordinator.base_port, 6000);
        assert_eq!(cfg.coordinator.ip, default_ip());
        assert_eq!(cfg.worker.max_running, 64);
        assert!(cfg.worker.disable_core_dumps);

        assert_eq!(cfg.schedule.custodians, 2);
        assert_eq!(cfg.task_settings().grace, Duration::from_secs(3));
        assert_eq!(
            cfg.schedule.per_task_capacity,
            GridConfig::default().per_task_capacity
        );
    }

    #[test]
    fn port_range_must_fit() {
        let mut cfg: GriddConfig = serde_json::from_str(SAMPLE).unwrap();
        cfg.coordinator.base_port = u16::MAX - 2;
        assert!(cfg.check().is_err());
    }

    #[test]
    fn worker_proc_carries_settings() {
        let cfg: GriddConfig = serde_json::from_str(SAMPLE).unwrap();
        let proc = cfg.worker_proc();
        assert_eq!(proc.program, "/opt/cirrus/worker");
        assert!(proc.disable_core_dumps);
        assert_eq!(
            proc.env,
            vec![
                ("CIRRUS_BUCKET".to_string(), "criteo-kaggle".to_string()),
                ("RUST_LOG".to_string(), "info".to_string()),
            ]
        );
        assert_eq!(cfg.worker.nonce_window, DEFAULT_NONCE_WINDOW);

        let coordinator = cfg.coordinator_proc();
        assert!(coordinator.env.is_empty());
        assert_eq!(coordinator.kill_grace, Duration::from_secs(5));
    }

    #[test]
    fn preprocessing_reaches_the_grid_config() {
        let cfg: GriddConfig = serde_json::from_str(SAMPLE).unwrap();
        let grid = cfg.grid_config();
        assert!(grid.preprocess);
        assert_eq!(grid.launch.max_in_flight, cfg.schedule.max_in_flight);
        assert!(!ScheduleConfig::default().preprocess);
    }
}
