//! Bounded retry around a fallible async operation.
//!
//! Every failure is classified by the caller:
//! - [`Verdict::Retryable`]: the hook runs (and may abort), then the operation is retried.
//! - [`Verdict::NonRetryable`]: counted against the budget like any other attempt;
//!   the error surfaces once the budget is exhausted.
//! - [`Verdict::Fatal`]: returned immediately.
//!
//! When the budget runs out the last error seen is returned.
use std::{fmt, future::Future, ops::ControlFlow};

use stratus_model::RetryPolicy;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

/// Classification of one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    NonRetryable,
    Fatal,
}

pub async fn retry<T, E, Op, Fut, C, H>(
    name: &str,
    policy: &RetryPolicy,
    mut op: Op,
    classify: C,
    mut on_retryable: H,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Verdict,
    H: FnMut(&E) -> ControlFlow<()>,
    E: fmt::Display,
{
    let call_started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        let attempt_started = Instant::now();
        let err = match op().await {
            Ok(value) => {
                debug!(
                    op = name,
                    attempt = attempts + 1,
                    attempt_ms = attempt_started.elapsed().as_millis() as u64,
                    total_ms = call_started.elapsed().as_millis() as u64,
                    "operation succeeded"
                );
                return Ok(value);
            }
            Err(e) => e,
        };

        match classify(&err) {
            Verdict::Fatal => {
                warn!(op = name, attempt = attempts + 1, error = %err, "fatal error, not retrying");
                return Err(err);
            }
            Verdict::Retryable => {
                trace!(op = name, attempt = attempts + 1, error = %err, "retryable error");
                if on_retryable(&err).is_break() {
                    debug!(op = name, error = %err, "retry aborted by handler");
                    return Err(err);
                }
            }
            Verdict::NonRetryable => {
                debug!(op = name, attempt = attempts + 1, error = %err, "non-retryable error");
            }
        }

        attempts = attempts.saturating_add(1);
        if policy.attempts.exhausted(attempts) {
            warn!(
                op = name,
                attempts,
                total_ms = call_started.elapsed().as_millis() as u64,
                error = %err,
                "retries exhausted"
            );
            return Err(err);
        }

        if let Some(backoff) = &policy.backoff {
            sleep(backoff.delay(attempts - 1, rand::random::<f64>())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use stratus_model::{Attempts, BackoffStrategy};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Throttled,
        Value,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn classify(e: &TestError) -> Verdict {
        match e {
            TestError::Throttled => Verdict::Retryable,
            TestError::Value => Verdict::NonRetryable,
        }
    }

    #[tokio::test]
    async fn always_retryable_runs_exactly_max_attempts() {
        let calls = Cell::new(0u32);
        let hooks = Cell::new(0u32);
        let res: Result<(), _> = retry(
            "throttled",
            &RetryPolicy::immediate(3),
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Throttled) }
            },
            classify,
            |_| {
                hooks.set(hooks.get() + 1);
                ControlFlow::Continue(())
            },
        )
        .await;

        assert_eq!(res, Err(TestError::Throttled));
        assert_eq!(calls.get(), 3);
        assert_eq!(hooks.get(), 3);
    }

    #[tokio::test]
    async fn non_retryable_surfaces_only_after_exhaustion() {
        let calls = Cell::new(0u32);
        let hooks = Cell::new(0u32);
        let res: Result<(), _> = retry(
            "value",
            &RetryPolicy::immediate(3),
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Value) }
            },
            classify,
            |_| {
                hooks.set(hooks.get() + 1);
                ControlFlow::Continue(())
            },
        )
        .await;

        assert_eq!(res, Err(TestError::Value));
        assert_eq!(calls.get(), 3);
        assert_eq!(hooks.get(), 0);
    }

    #[tokio::test]
    async fn non_retryable_once_then_success() {
        let calls = Cell::new(0u32);
        let res = retry(
            "flaky",
            &RetryPolicy::immediate(3),
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { if n == 1 { Err(TestError::Value) } else { Ok(n) } }
            },
            classify,
            |_| ControlFlow::Continue(()),
        )
        .await;

        assert_eq!(res, Ok(2));
    }

    #[tokio::test]
    async fn fatal_returns_immediately() {
        let calls = Cell::new(0u32);
        let res: Result<(), _> = retry(
            "fatal",
            &RetryPolicy::immediate(5),
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Value) }
            },
            |_| Verdict::Fatal,
            |_| ControlFlow::Continue(()),
        )
        .await;

        assert_eq!(res, Err(TestError::Value));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn hook_can_abort() {
        let calls = Cell::new(0u32);
        let res: Result<(), _> = retry(
            "abort",
            &RetryPolicy::immediate(5),
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Throttled) }
            },
            classify,
            |_| ControlFlow::Break(()),
        )
        .await;

        assert_eq!(res, Err(TestError::Throttled));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn infinite_attempts_with_backoff_eventually_succeed() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy {
            attempts: Attempts::Infinite,
            backoff: Some(BackoffStrategy {
                first_ms: 10,
                max_ms: 1_000,
                factor: 2.0,
                jitter: 0.0,
            }),
        };
        let started = Instant::now();
        let res = retry(
            "eventually",
            &policy,
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { if n <= 10 { Err(TestError::Throttled) } else { Ok(n) } }
            },
            classify,
            |_| ControlFlow::Continue(()),
        )
        .await;

        assert_eq!(res, Ok(11));
        // 10 + 20 + 40 + ... capped at 1000ms
        let expected_ms: u64 = (0..10).map(|k| (10u64 << k).min(1_000)).sum();
        let waited = started.elapsed().as_millis() as u64;
        assert!(waited >= expected_ms && waited <= expected_ms + 10, "waited {waited}ms");
    }
}
