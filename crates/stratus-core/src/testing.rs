//! Recording test doubles for the platform seams.
//!
//! Doubles that share a [`CallLog`] record into one ordered list, so tests can
//! assert on the relative order of coordinator, host and invoker calls.
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use stratus_exec::{InvokeError, Invoker};
use stratus_model::{ConfigDocument, Invocation, Seconds};
use tokio_util::sync::CancellationToken;

use crate::platform::{
    CapacityProbe, CommandHost, Connector, Coordinator, PlatformError, Probe, ProbeError,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// Coordinator on this port started.
    Start(u16),
    /// Coordinator stopped; records whether the owning task's stop signal was already set.
    Stop { port: u16, stop_signalled: bool },
    Invoke(Invocation),
    Buffering(String, bool),
    Flush(String),
    /// The watched stop signal fired; every later entry was recorded after it.
    Signalled,
}

#[derive(Default)]
struct LogInner {
    calls: Vec<Call>,
    signal: Option<CancellationToken>,
    signalled: bool,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<LogInner>>);

impl CallLog {
    pub fn record(&self, call: Call) {
        let mut inner = lock(&self.0);
        mark_signal(&mut inner);
        inner.calls.push(call);
    }

    /// Marks [`Call::Signalled`] ahead of the first entry recorded after `signal` fires.
    pub fn watch_signal(&self, signal: CancellationToken) {
        lock(&self.0).signal = Some(signal);
    }

    pub fn calls(&self) -> Vec<Call> {
        let mut inner = lock(&self.0);
        mark_signal(&mut inner);
        inner.calls.clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.0)
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Invoke(inv) => Some(inv.clone()),
                _ => None,
            })
            .collect()
    }
}

fn mark_signal(inner: &mut LogInner) {
    if !inner.signalled && inner.signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
        inner.signalled = true;
        inner.calls.push(Call::Signalled);
    }
}

pub struct StubCoordinator {
    port: u16,
    log: CallLog,
    signal: OnceLock<CancellationToken>,
    config: Mutex<Option<String>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

impl StubCoordinator {
    pub fn new(port: u16, log: CallLog) -> Self {
        Self {
            port,
            log,
            signal: OnceLock::new(),
            config: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
        }
    }

    /// Stop signal checked when `stop` is called.
    pub fn watch(&self, signal: CancellationToken) {
        let _ = self.signal.set(signal);
    }

    pub fn fail_start(&self, on: bool) {
        self.fail_start.store(on, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, on: bool) {
        self.fail_stop.store(on, Ordering::SeqCst);
    }

    pub fn last_config(&self) -> Option<String> {
        lock(&self.config).clone()
    }
}

#[async_trait]
impl Coordinator for StubCoordinator {
    fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port)
    }

    fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port + 1)
    }

    fn private_ip(&self) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn start(&self, config: &ConfigDocument) -> Result<(), PlatformError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PlatformError::Command("start refused".into()));
        }
        *lock(&self.config) = Some(config.to_string());
        self.log.record(Call::Start(self.port));
        Ok(())
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        self.log.record(Call::Stop {
            port: self.port,
            stop_signalled: self.signal.get().is_some_and(CancellationToken::is_cancelled),
        });
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(PlatformError::Command("instance not found".into()));
        }
        Ok(())
    }
}

/// Probe answering every address with the same configurable values.
#[derive(Default)]
pub struct StubProbe {
    connected: AtomicU32,
    time_loss: Mutex<Option<(Seconds, f64)>>,
    updates: AtomicU64,
    unreachable: AtomicBool,
}

impl StubProbe {
    pub fn set_connected(&self, n: u32) {
        self.connected.store(n, Ordering::SeqCst);
    }

    pub fn set_time_loss(&self, time: Seconds, loss: f64) {
        *lock(&self.time_loss) = Some((time, loss));
    }

    pub fn set_updates(&self, n: u64) {
        self.updates.store(n, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, on: bool) {
        self.unreachable.store(on, Ordering::SeqCst);
    }

    fn check(&self, addr: SocketAddr) -> Result<(), ProbeError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProbeError::Unreachable(addr.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Probe for StubProbe {
    async fn connected_workers(&self, addr: SocketAddr) -> Result<u32, ProbeError> {
        self.check(addr)?;
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn last_time_and_loss(&self, addr: SocketAddr) -> Result<(Seconds, f64), ProbeError> {
        self.check(addr)?;
        lock(&self.time_loss).ok_or(ProbeError::Timeout)
    }

    async fn update_count(&self, addr: SocketAddr) -> Result<u64, ProbeError> {
        self.check(addr)?;
        Ok(self.updates.load(Ordering::SeqCst))
    }
}

/// Invoker that records every attempt and fails scripted ones.
pub struct RecordingInvoker {
    log: CallLog,
    attempts: AtomicU32,
    scripted: Mutex<HashMap<u32, InvokeError>>,
}

impl RecordingInvoker {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            attempts: AtomicU32::new(0),
            scripted: Mutex::new(HashMap::new()),
        }
    }

    /// The `n`th attempt (0-based) fails with `err`.
    pub fn fail_nth(&self, n: u32, err: InvokeError) {
        lock(&self.scripted).insert(n, err);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Invoker for RecordingInvoker {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<(), InvokeError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.log.record(Call::Invoke(invocation.clone()));
        match lock(&self.scripted).remove(&n) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct StaticCapacity {
    available: AtomicU32,
}

impl StaticCapacity {
    pub fn new(available: u32) -> Self {
        Self {
            available: AtomicU32::new(available),
        }
    }

    pub fn set(&self, available: u32) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl CapacityProbe for StaticCapacity {
    async fn available_concurrency(&self) -> Result<u32, PlatformError> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

/// Connector handing out fixed clients and counting constructions.
pub struct StubConnector {
    invoker: Arc<dyn Invoker>,
    capacity: Arc<dyn CapacityProbe>,
    pub invoker_builds: AtomicU32,
    pub capacity_builds: AtomicU32,
    /// Fail the next construction of either kind.
    pub fail_next: AtomicBool,
}

impl StubConnector {
    pub fn new(invoker: Arc<dyn Invoker>, capacity: Arc<dyn CapacityProbe>) -> Self {
        Self {
            invoker,
            capacity,
            invoker_builds: AtomicU32::new(0),
            capacity_builds: AtomicU32::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    fn maybe_fail(&self) -> Result<(), PlatformError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("credentials expired".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn invoker(&self) -> Result<Arc<dyn Invoker>, PlatformError> {
        self.invoker_builds.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.maybe_fail()?;
        Ok(Arc::clone(&self.invoker))
    }

    async fn capacity(&self) -> Result<Arc<dyn CapacityProbe>, PlatformError> {
        self.capacity_builds.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(Arc::clone(&self.capacity))
    }
}

pub struct RecordingHost {
    name: String,
    log: CallLog,
}

impl RecordingHost {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl CommandHost for RecordingHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_buffering(&self, on: bool) {
        self.log.record(Call::Buffering(self.name.clone(), on));
    }

    async fn flush(&self) -> Result<(), PlatformError> {
        self.log.record(Call::Flush(self.name.clone()));
        Ok(())
    }
}
