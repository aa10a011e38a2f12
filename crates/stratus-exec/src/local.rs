//! In-process stand-in for a serverless compute provider.
//!
//! Each invocation spawns one child process. The invoker enforces a ceiling
//! on concurrently running children (reported as throttling) and rejects
//! nonces it has already executed. Only the most recent nonces are
//! remembered, so memory stays bounded in a long-running daemon.
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use stratus_model::Invocation;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    invoke::{InvokeError, Invoker},
    proc::{ProcConfig, kill_graceful, spawn},
};

/// Nonces remembered by default.
pub const DEFAULT_NONCE_WINDOW: usize = 65_536;

/// Most recent `cap` nonces, oldest evicted first.
struct NonceWindow {
    cap: usize,
    order: VecDeque<u64>,
    set: HashSet<u64>,
}

impl NonceWindow {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    /// Records `nonce`; `false` if it is still remembered.
    fn insert(&mut self, nonce: u64) -> bool {
        if !self.set.insert(nonce) {
            return false;
        }
        self.order.push_back(nonce);
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct LocalInvoker {
    cfg: ProcConfig,
    max_running: usize,
    running: Arc<AtomicUsize>,
    seen: Mutex<NonceWindow>,
    shutdown: CancellationToken,
}

impl LocalInvoker {
    pub fn new(cfg: ProcConfig, max_running: usize) -> Self {
        Self {
            cfg,
            max_running,
            running: Arc::new(AtomicUsize::new(0)),
            seen: Mutex::new(NonceWindow::new(DEFAULT_NONCE_WINDOW)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Remembers only the last `cap` nonces for duplicate detection.
    pub fn with_nonce_window(mut self, cap: usize) -> Self {
        self.seen = Mutex::new(NonceWindow::new(cap));
        self
    }

    /// Nonces currently remembered.
    pub fn remembered_nonces(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn max_running(&self) -> usize {
        self.max_running
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Free execution slots right now.
    pub fn available(&self) -> usize {
        self.max_running.saturating_sub(self.running())
    }

    /// Terminates every child still running. Later invocations are refused.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn reserve_slot(&self) -> bool {
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_running).then_some(n + 1)
            })
            .is_ok()
    }
}

#[async_trait]
impl Invoker for LocalInvoker {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<(), InvokeError> {
        if self.shutdown.is_cancelled() {
            return Err(InvokeError::Failed("local backend is shut down".into()));
        }
        if !self.reserve_slot() {
            return Err(InvokeError::Throttled(format!(
                "{} local executions already running",
                self.max_running
            )));
        }

        let nonce = invocation.nonce();
        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(nonce);
        if !fresh {
            self.running.fetch_sub(1, Ordering::SeqCst);
            return Err(InvokeError::Duplicate(nonce));
        }

        let payload = match serde_json::to_string(invocation) {
            Ok(p) => p,
            Err(e) => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                return Err(InvokeError::Failed(format!("encode payload: {e}")));
            }
        };
        let mut child = match spawn(&self.cfg, &payload) {
            Ok(child) => child,
            Err(e) => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                return Err(InvokeError::Failed(e.to_string()));
            }
        };

        let running = Arc::clone(&self.running);
        let shutdown = self.shutdown.clone();
        let grace = self.cfg.kill_grace;
        let kind = invocation.kind();
        debug!(kind, nonce, pid = child.id(), "local execution started");

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => debug!(kind, nonce, "local execution finished"),
                    Ok(s) => info!(kind, nonce, status = %s, "local execution exited unsuccessfully"),
                    Err(e) => warn!(kind, nonce, error = %e, "failed to wait for local execution"),
                },
                _ = shutdown.cancelled() => {
                    if let Err(e) = kill_graceful(&mut child, grace).await {
                        warn!(kind, nonce, error = %e, "failed to kill local execution");
                    }
                }
            }
            running.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use stratus_model::PreprocessPayload;

    use super::*;

    fn chunk(nonce: u64) -> Invocation {
        Invocation::Preprocess(PreprocessPayload {
            chunk_id: 0,
            bucket: "b".into(),
            dupe_nonce: nonce,
        })
    }

    async fn wait_idle(inv: &LocalInvoker) {
        for _ in 0..200 {
            if inv.running() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("children still running");
    }

    #[tokio::test]
    async fn repeated_nonce_is_rejected() {
        let inv = LocalInvoker::new(ProcConfig::new("true"), 4);
        inv.invoke(&chunk(7)).await.unwrap();
        assert_eq!(inv.invoke(&chunk(7)).await, Err(InvokeError::Duplicate(7)));
        wait_idle(&inv).await;
    }

    #[test]
    fn nonce_window_evicts_oldest() {
        let mut w = NonceWindow::new(2);
        assert!(w.insert(1));
        assert!(w.insert(2));
        assert!(!w.insert(2));
        assert!(w.insert(3));
        assert_eq!(w.len(), 2);
        // 1 was evicted, 3 is still remembered
        assert!(w.insert(1));
        assert!(!w.insert(3));
    }

    #[tokio::test]
    async fn remembered_nonces_stay_bounded() {
        let inv = LocalInvoker::new(ProcConfig::new("true"), 8).with_nonce_window(3);
        for nonce in 0..6 {
            inv.invoke(&chunk(nonce)).await.unwrap();
            wait_idle(&inv).await;
        }
        assert_eq!(inv.remembered_nonces(), 3);
        assert_eq!(inv.invoke(&chunk(5)).await, Err(InvokeError::Duplicate(5)));
        wait_idle(&inv).await;
    }

    #[tokio::test]
    async fn ceiling_reports_throttling_and_frees_slots_on_exit() {
        let cfg = ProcConfig::new("sh").with_arg("-c").with_arg("sleep 0.2");
        let inv = LocalInvoker::new(cfg, 1);

        inv.invoke(&chunk(1)).await.unwrap();
        assert_eq!(inv.available(), 0);
        let err = inv.invoke(&chunk(2)).await.unwrap_err();
        assert!(err.is_throttle());

        wait_idle(&inv).await;
        // throttled nonce was never recorded
        inv.invoke(&chunk(2)).await.unwrap();
        wait_idle(&inv).await;
    }

    #[tokio::test]
    async fn shutdown_kills_running_children() {
        let cfg = ProcConfig::new("sh").with_arg("-c").with_arg("sleep 30");
        let inv = LocalInvoker::new(cfg, 2);
        inv.invoke(&chunk(1)).await.unwrap();
        assert_eq!(inv.running(), 1);

        inv.shutdown();
        wait_idle(&inv).await;
        assert!(inv.invoke(&chunk(2)).await.is_err());
    }
}
