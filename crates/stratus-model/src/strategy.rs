use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times an operation may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Attempts {
    Limited(u32),
    /// Keep retrying until the operation succeeds or is aborted.
    Infinite,
}

impl Attempts {
    /// Returns `true` once `made` attempts use up the budget.
    pub fn exhausted(&self, made: u32) -> bool {
        match self {
            Attempts::Limited(max) => made >= *max,
            Attempts::Infinite => false,
        }
    }
}

/// Jittered exponential backoff.
///
/// The wait before retry `k` (0-based) is `first_ms * factor^k`, capped at
/// `max_ms`, then shortened by up to `jitter` of itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffStrategy {
    pub first_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    /// Fraction in `[0, 1]`.
    pub jitter: f64,
}

impl BackoffStrategy {
    /// Delay before retry `retry`, with `sample` drawn uniformly from `[0, 1)`.
    pub fn delay(&self, retry: u32, sample: f64) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let raw = self.first_ms as f64 * self.factor.max(1.0).powi(exp);
        let capped = raw.min(self.max_ms as f64);
        let jitter = self.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0);
        Duration::from_millis((capped * (1.0 - jitter)).round() as u64)
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self {
            first_ms: 100,
            max_ms: 5_000,
            factor: 2.0,
            jitter: 0.5,
        }
    }
}

/// Retry budget plus optional pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub attempts: Attempts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffStrategy>,
}

impl RetryPolicy {
    /// Retry immediately, at most `max` attempts in total.
    pub fn immediate(max: u32) -> Self {
        Self {
            attempts: Attempts::Limited(max),
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: Attempts::Limited(8),
            backoff: Some(BackoffStrategy::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_attempts_exhaust() {
        let a = Attempts::Limited(3);
        assert!(!a.exhausted(2));
        assert!(a.exhausted(3));
        assert!(!Attempts::Infinite.exhausted(u32::MAX));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let b = BackoffStrategy {
            first_ms: 100,
            max_ms: 1_000,
            factor: 2.0,
            jitter: 0.0,
        };
        assert_eq!(b.delay(0, 0.9), Duration::from_millis(100));
        assert_eq!(b.delay(2, 0.9), Duration::from_millis(400));
        assert_eq!(b.delay(10, 0.9), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_shortens_within_fraction() {
        let b = BackoffStrategy {
            first_ms: 1_000,
            max_ms: 10_000,
            factor: 2.0,
            jitter: 0.5,
        };
        assert_eq!(b.delay(0, 0.0), Duration::from_millis(1_000));
        assert_eq!(b.delay(0, 1.0), Duration::from_millis(500));
        let mid = b.delay(0, 0.5);
        assert!(mid >= Duration::from_millis(500) && mid <= Duration::from_millis(1_000));
    }

    #[test]
    fn infinite_attempts_serde() {
        let p = RetryPolicy {
            attempts: Attempts::Infinite,
            backoff: None,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"attempts":"infinite"}"#);
        let limited: RetryPolicy = serde_json::from_str(r#"{"attempts":{"limited":3}}"#).unwrap();
        assert_eq!(limited, RetryPolicy::immediate(3));
    }
}
