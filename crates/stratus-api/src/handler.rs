use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratus_model::{Dollars, TaskSnapshot};

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub experiments: usize,
    pub running: bool,
    /// Spend so far across every experiment.
    pub total: Dollars,
    pub per_second: Dollars,
}

/// Grid search API handler.
///
/// Implement it directly to add auth or rate limiting in front of
/// [`GridApiAdapter`](crate::GridApiAdapter).
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    async fn experiments(&self) -> Result<Vec<TaskSnapshot>, ApiError>;

    async fn experiment(&self, index: usize) -> Result<TaskSnapshot, ApiError>;

    /// Stops one experiment and returns once it is dead.
    async fn kill(&self, index: usize) -> Result<(), ApiError>;

    /// Experiments ranked by latest loss; see `GridSearch::get_top` for `n`.
    async fn top(&self, n: i64) -> Result<Vec<TaskSnapshot>, ApiError>;

    async fn cost(&self) -> Result<CostSummary, ApiError>;

    /// Stops every experiment and returns the indices that were still alive.
    async fn kill_all(&self) -> Result<Vec<usize>, ApiError>;
}
