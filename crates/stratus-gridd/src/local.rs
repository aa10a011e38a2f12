//! Single-machine platform: coordinators and workers are local child processes.
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use stratus_core::{CapacityProbe, CommandHost, Connector, Coordinator, PlatformError};
use stratus_exec::{
    Invoker,
    local::LocalInvoker,
    proc::{self, ProcConfig},
};
use stratus_model::ConfigDocument;
use tokio::process::Child;
use tracing::{debug, info, warn};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type Deferred = Box<dyn FnOnce() -> Result<(), PlatformError> + Send>;

/// Command host that can hold start commands until [`CommandHost::flush`].
pub struct LocalHost {
    name: String,
    buffering: AtomicBool,
    queue: Mutex<Vec<Deferred>>,
}

impl LocalHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffering: AtomicBool::new(false),
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Runs `cmd` now, or queues it while buffering.
    pub fn submit(&self, cmd: Deferred) -> Result<(), PlatformError> {
        if self.buffering.load(Ordering::SeqCst) {
            lock(&self.queue).push(cmd);
            return Ok(());
        }
        cmd()
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}

#[async_trait]
impl CommandHost for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_buffering(&self, on: bool) {
        self.buffering.store(on, Ordering::SeqCst);
    }

    /// Runs every queued command; one failure does not skip the rest.
    async fn flush(&self) -> Result<(), PlatformError> {
        let queued: Vec<_> = lock(&self.queue).drain(..).collect();
        debug!(host = %self.name, count = queued.len(), "flushing buffered commands");
        let mut first_err = None;
        for cmd in queued {
            if let Err(e) = cmd() {
                warn!(host = %self.name, error = %e, "buffered command failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Parameter-server child process listening on one port (TCP control, UDP metrics).
pub struct LocalCoordinator {
    ip: IpAddr,
    port: u16,
    proc: ProcConfig,
    host: Arc<LocalHost>,
    child: Arc<Mutex<Option<Child>>>,
}

impl LocalCoordinator {
    pub fn new(ip: IpAddr, port: u16, proc: ProcConfig, host: Arc<LocalHost>) -> Self {
        Self {
            ip,
            port,
            proc,
            host,
            child: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Coordinator for LocalCoordinator {
    fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    fn private_ip(&self) -> IpAddr {
        self.ip
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn start(&self, config: &ConfigDocument) -> Result<(), PlatformError> {
        let cmd = self
            .proc
            .clone()
            .with_arg("--port")
            .with_arg(self.port.to_string());
        let text = config.to_string();
        let slot = Arc::clone(&self.child);
        let port = self.port;
        self.host.submit(Box::new(move || {
            let child =
                proc::spawn(&cmd, &text).map_err(|e| PlatformError::Command(e.to_string()))?;
            info!(port, pid = child.id(), "coordinator process started");
            *lock(&slot) = Some(child);
            Ok(())
        }))
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        let child = lock(&self.child).take();
        match child {
            Some(mut child) => {
                proc::kill_graceful(&mut child, self.proc.kill_grace).await?;
                info!(port = self.port, "coordinator process stopped");
                Ok(())
            }
            None => {
                debug!(port = self.port, "no coordinator process to stop");
                Ok(())
            }
        }
    }
}

/// Reports the local invoker's concurrency ceiling as the account limit.
pub struct LocalCapacity {
    invoker: Arc<LocalInvoker>,
}

#[async_trait]
impl CapacityProbe for LocalCapacity {
    async fn available_concurrency(&self) -> Result<u32, PlatformError> {
        Ok(u32::try_from(self.invoker.max_running()).unwrap_or(u32::MAX))
    }
}

pub struct LocalConnector {
    invoker: Arc<LocalInvoker>,
}

impl LocalConnector {
    pub fn new(invoker: Arc<LocalInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn invoker(&self) -> Result<Arc<dyn Invoker>, PlatformError> {
        Ok(Arc::clone(&self.invoker) as Arc<dyn Invoker>)
    }

    async fn capacity(&self) -> Result<Arc<dyn CapacityProbe>, PlatformError> {
        Ok(Arc::new(LocalCapacity {
            invoker: Arc::clone(&self.invoker),
        }))
    }
}
