//! Deduplicating fan-out launcher.
//!
//! One invocation unit is started per target. Each unit carries a fresh
//! random nonce so the remote side can reject repeated executions, and runs
//! through [`retry`](crate::retry::retry) treating throttling as retryable and
//! every other error as fatal for that unit only.
//!
//! At most `max_in_flight` units are outstanding at once: when the window is
//! full the launcher waits for the oldest unit before starting the next.
//! [`Launcher::launch`] is a barrier and returns only after every unit settled.
//!
//! Cancellation is cooperative: once the token fires no unit issues a new
//! provider call, and units that have not made their first call are skipped.
use std::{collections::VecDeque, ops::ControlFlow, sync::Arc};

use stratus_model::{Invocation, RetryPolicy};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    invoke::{InvokeError, Invoker},
    retry::{Verdict, retry},
};

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Upper bound on concurrently outstanding invocation units.
    pub max_in_flight: usize,
    /// Retry policy applied inside each unit.
    pub retry: RetryPolicy,
}

impl LaunchConfig {
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchFailure {
    pub target: u32,
    pub error: InvokeError,
}

/// Outcome of one [`Launcher::launch`] barrier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    /// Targets handed to the launcher.
    pub requested: u32,
    /// Units accepted by the provider.
    pub launched: u32,
    /// Targets never started because cancellation was requested first.
    pub skipped: u32,
    pub failures: Vec<LaunchFailure>,
}

impl LaunchReport {
    /// Every requested target was accepted by the provider.
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }

    fn settle(&mut self, target: u32, joined: Result<Option<Result<(), InvokeError>>, JoinError>) {
        let error = match joined {
            Ok(Some(Ok(()))) => {
                self.launched += 1;
                return;
            }
            Ok(None) => {
                self.skipped += 1;
                return;
            }
            Ok(Some(Err(e))) => e,
            Err(e) => InvokeError::Failed(format!("invocation unit aborted: {e}")),
        };
        self.failures.push(LaunchFailure { target, error });
    }
}

/// Fresh per-unit deduplication nonce.
pub fn fresh_nonce() -> u64 {
    rand::random::<u64>()
}

#[derive(Clone)]
pub struct Launcher {
    invoker: Arc<dyn Invoker>,
    cfg: LaunchConfig,
}

impl Launcher {
    pub fn new(invoker: Arc<dyn Invoker>, cfg: LaunchConfig) -> Self {
        Self { invoker, cfg }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.cfg
    }

    /// Starts one invocation per target and waits for all of them.
    ///
    /// `build` receives the target and the unit's nonce. Once `cancel` fires,
    /// targets not yet started are skipped; units already started complete.
    #[instrument(level = "debug", skip_all, fields(invoker = self.invoker.name()))]
    pub async fn launch<I, F>(
        &self,
        targets: I,
        cancel: Option<&CancellationToken>,
        build: F,
    ) -> LaunchReport
    where
        I: IntoIterator<Item = u32>,
        F: Fn(u32, u64) -> Invocation,
    {
        let max = self.cfg.max_in_flight.max(1);
        let mut in_flight: VecDeque<(u32, JoinHandle<Option<Result<(), InvokeError>>>)> =
            VecDeque::with_capacity(max);
        let mut report = LaunchReport::default();

        for target in targets {
            report.requested += 1;

            if in_flight.len() >= max
                && let Some((oldest, handle)) = in_flight.pop_front()
            {
                trace!(target = oldest, "window full, waiting for oldest unit");
                report.settle(oldest, handle.await);
            }

            if cancel.is_some_and(CancellationToken::is_cancelled) {
                report.skipped += 1;
                continue;
            }

            let invocation = build(target, fresh_nonce());
            let invoker = Arc::clone(&self.invoker);
            let policy = self.cfg.retry;
            let cancel = cancel.cloned();
            let handle = tokio::spawn(async move {
                invoke_unit(invoker, invocation, policy, cancel.as_ref()).await
            });
            in_flight.push_back((target, handle));
        }

        while let Some((target, handle)) = in_flight.pop_front() {
            report.settle(target, handle.await);
        }

        if report.failures.is_empty() {
            debug!(
                requested = report.requested,
                launched = report.launched,
                skipped = report.skipped,
                "launch completed"
            );
        } else {
            info!(
                requested = report.requested,
                launched = report.launched,
                failed = report.failures.len(),
                skipped = report.skipped,
                "launch completed with failures"
            );
        }
        report
    }
}

/// Runs one unit; `None` means it was cancelled before its first call.
async fn invoke_unit(
    invoker: Arc<dyn Invoker>,
    invocation: Invocation,
    policy: RetryPolicy,
    cancel: Option<&CancellationToken>,
) -> Option<Result<(), InvokeError>> {
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return None;
    }
    let name = format!("{}:{:016x}", invocation.kind(), invocation.nonce());
    let invoker: &dyn Invoker = invoker.as_ref();
    let invocation = &invocation;

    let res = retry(
        &name,
        &policy,
        move || invoker.invoke(invocation),
        |e: &InvokeError| {
            if e.is_throttle() {
                Verdict::Retryable
            } else {
                Verdict::Fatal
            }
        },
        |e| {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return ControlFlow::Break(());
            }
            debug!(unit = %name, error = %e, "invocation throttled, retrying");
            ControlFlow::Continue(())
        },
    )
    .await;

    if let Err(e) = &res {
        warn!(unit = %name, error = %e, "invocation unit failed");
    }
    Some(res)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use stratus_model::{BackoffStrategy, PreprocessPayload, RetryPolicy};

    use super::*;

    /// Invoker that records nonces, tracks peak concurrency and can script failures per chunk.
    #[derive(Default)]
    struct ScriptedInvoker {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        nonces: Mutex<Vec<u64>>,
        throttle_first: Mutex<HashMap<u32, u32>>,
        fail: HashSet<u32>,
        hold: Duration,
    }

    #[async_trait]
    impl Invoker for ScriptedInvoker {
        async fn invoke(&self, invocation: &Invocation) -> Result<(), InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let Invocation::Preprocess(p) = invocation else {
                return Err(InvokeError::Failed("unexpected kind".into()));
            };

            if let Some(left) = self.throttle_first.lock().unwrap().get_mut(&p.chunk_id)
                && *left > 0
            {
                *left -= 1;
                return Err(InvokeError::Throttled("rate exceeded".into()));
            }
            if self.fail.contains(&p.chunk_id) {
                return Err(InvokeError::Failed("bad chunk".into()));
            }

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.nonces.lock().unwrap().push(p.dupe_nonce);
            Ok(())
        }
    }

    fn build(chunk_id: u32, nonce: u64) -> Invocation {
        Invocation::Preprocess(PreprocessPayload {
            chunk_id,
            bucket: "data".into(),
            dupe_nonce: nonce,
        })
    }

    fn launcher(invoker: Arc<ScriptedInvoker>, max: usize) -> Launcher {
        Launcher::new(
            invoker,
            LaunchConfig::default()
                .with_max_in_flight(max)
                .with_retry(RetryPolicy::immediate(5)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn launches_one_unit_per_target_and_waits_for_all() {
        let inv = Arc::new(ScriptedInvoker {
            hold: Duration::from_millis(50),
            ..Default::default()
        });
        let report = launcher(inv.clone(), 4).launch(0..10, None, build).await;

        assert_eq!(report.requested, 10);
        assert_eq!(report.launched, 10);
        assert!(report.failures.is_empty());
        assert_eq!(inv.running.load(Ordering::SeqCst), 0);
        assert_eq!(inv.nonces.lock().unwrap().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_window() {
        let inv = Arc::new(ScriptedInvoker {
            hold: Duration::from_millis(20),
            ..Default::default()
        });
        let report = launcher(inv.clone(), 3).launch(0..20, None, build).await;

        assert_eq!(report.launched, 20);
        let peak = inv.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
    }

    #[tokio::test]
    async fn every_unit_gets_a_distinct_nonce() {
        let inv = Arc::new(ScriptedInvoker::default());
        launcher(inv.clone(), 8).launch(0..50, None, build).await;

        let nonces = inv.nonces.lock().unwrap();
        let distinct: HashSet<_> = nonces.iter().collect();
        assert_eq!(distinct.len(), 50);
    }

    #[tokio::test]
    async fn throttled_units_are_retried() {
        let inv = Arc::new(ScriptedInvoker::default());
        inv.throttle_first.lock().unwrap().insert(2, 2);
        let report = launcher(inv.clone(), 2).launch(0..4, None, build).await;

        assert_eq!(report.launched, 4);
        assert_eq!(inv.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn non_throttle_error_fails_only_that_unit() {
        let inv = Arc::new(ScriptedInvoker {
            fail: HashSet::from([1]),
            ..Default::default()
        });
        let report = launcher(inv.clone(), 2).launch(0..4, None, build).await;

        assert_eq!(report.launched, 3);
        assert_eq!(
            report.failures,
            vec![LaunchFailure {
                target: 1,
                error: InvokeError::Failed("bad chunk".into()),
            }]
        );
        // fatal: one call for the failing unit, no retries
        assert_eq!(inv.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancellation_stops_throttle_retries() {
        let inv = Arc::new(ScriptedInvoker::default());
        inv.throttle_first.lock().unwrap().insert(0, 100);
        let token = CancellationToken::new();
        let launcher = Launcher::new(
            inv.clone(),
            LaunchConfig::default()
                .with_max_in_flight(1)
                .with_retry(RetryPolicy::immediate(100).with_backoff(BackoffStrategy {
                    first_ms: 10,
                    max_ms: 10,
                    factor: 1.0,
                    jitter: 0.0,
                })),
        );

        let cancel_later = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(35)).await;
                token.cancel();
            }
        };
        let (report, ()) = tokio::join!(launcher.launch(0..1, Some(&token), build), cancel_later);

        assert_eq!(report.launched, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.is_throttle());
        let calls = inv.calls.load(Ordering::SeqCst);
        assert!(calls < 10, "kept calling after cancellation: {calls}");
    }

    #[tokio::test]
    async fn cancelled_launch_starts_nothing() {
        let inv = Arc::new(ScriptedInvoker::default());
        let token = CancellationToken::new();
        token.cancel();
        let report = launcher(inv.clone(), 2).launch(0..5, Some(&token), build).await;

        assert_eq!(report.skipped, 5);
        assert_eq!(report.launched, 0);
        assert_eq!(inv.calls.load(Ordering::SeqCst), 0);
    }
}
