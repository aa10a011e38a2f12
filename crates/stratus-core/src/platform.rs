//! Narrow interfaces to the external collaborators the control plane drives.
//!
//! Provisioning, remote shells and the coordinator binary itself live outside
//! this workspace; everything here is consumed through these traits.
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use async_trait::async_trait;
use stratus_exec::Invoker;
use stratus_model::{ConfigDocument, Seconds};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("remote command failed: {0}")]
    Command(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PlatformError {
    fn from(e: std::io::Error) -> Self {
        PlatformError::Io(e.to_string())
    }
}

/// Failure of one liveness or metrics query. Callers treat every variant as
/// "no update available".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("coordinator unreachable: {0}")]
    Unreachable(String),
    #[error("coordinator did not answer in time")]
    Timeout,
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// One experiment's long-lived coordinator (parameter server) process.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Address answering liveness queries (TCP).
    fn control_addr(&self) -> SocketAddr;
    /// Address answering metrics queries (UDP).
    fn metrics_addr(&self) -> SocketAddr;
    /// Address workers connect to from inside the provider network.
    fn private_ip(&self) -> IpAddr;
    fn port(&self) -> u16;

    /// Starts the coordinator with the rendered configuration document.
    async fn start(&self, config: &ConfigDocument) -> Result<(), PlatformError>;
    async fn stop(&self) -> Result<(), PlatformError>;
}

/// A compute instance that executes coordinator commands.
///
/// While buffering, commands are queued and only executed on [`flush`](CommandHost::flush).
#[async_trait]
pub trait CommandHost: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn set_buffering(&self, on: bool);
    async fn flush(&self) -> Result<(), PlatformError>;
}

/// Account-level concurrency still available for new invocations.
#[async_trait]
pub trait CapacityProbe: Send + Sync + 'static {
    async fn available_concurrency(&self) -> Result<u32, PlatformError>;
}

/// Liveness and metrics queries against a running coordinator.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Workers currently connected, excluding the probe's own connection.
    async fn connected_workers(&self, addr: SocketAddr) -> Result<u32, ProbeError>;
    /// Coordinator-side elapsed seconds and the latest loss.
    async fn last_time_and_loss(&self, addr: SocketAddr) -> Result<(Seconds, f64), ProbeError>;
    /// Total model updates applied so far.
    async fn update_count(&self, addr: SocketAddr) -> Result<u64, ProbeError>;
}

/// Builds remote-service clients. Each method is called at most once per
/// [`ClientFactory`](crate::ClientFactory).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn invoker(&self) -> Result<Arc<dyn Invoker>, PlatformError>;
    async fn capacity(&self) -> Result<Arc<dyn CapacityProbe>, PlatformError>;
}
