use async_trait::async_trait;
use stratus_model::Invocation;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// Provider concurrency ceiling hit; safe to retry.
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("duplicate invocation rejected (nonce {0})")]
    Duplicate(u64),
    #[error("invocation failed: {0}")]
    Failed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl InvokeError {
    pub fn is_throttle(&self) -> bool {
        matches!(self, InvokeError::Throttled(_))
    }
}

/// Stateless compute-invocation interface.
///
/// `invoke` returns once the provider accepted the invocation; it does not
/// wait for the remote execution to finish.
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        "invoker"
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<(), InvokeError>;
}
