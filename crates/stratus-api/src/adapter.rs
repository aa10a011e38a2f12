use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::GridSearch;
use stratus_model::{TaskSnapshot, TaskState};

use crate::{
    error::ApiError,
    handler::{ApiHandler, CostSummary},
};

/// Serves [`ApiHandler`] straight from a grid search.
pub struct GridApiAdapter {
    grid: Arc<GridSearch>,
}

impl GridApiAdapter {
    pub fn new(grid: Arc<GridSearch>) -> Self {
        Self { grid }
    }
}

#[async_trait]
impl ApiHandler for GridApiAdapter {
    async fn experiments(&self) -> Result<Vec<TaskSnapshot>, ApiError> {
        Ok(self.grid.snapshots())
    }

    async fn experiment(&self, index: usize) -> Result<TaskSnapshot, ApiError> {
        self.grid.snapshot(index).ok_or(ApiError::NotFound(index))
    }

    async fn kill(&self, index: usize) -> Result<(), ApiError> {
        self.grid.kill(index).await.map_err(ApiError::from_core)
    }

    async fn top(&self, n: i64) -> Result<Vec<TaskSnapshot>, ApiError> {
        Ok(self
            .grid
            .get_top(n)
            .into_iter()
            .filter_map(|i| self.grid.snapshot(i))
            .collect())
    }

    async fn cost(&self) -> Result<CostSummary, ApiError> {
        Ok(CostSummary {
            experiments: self.grid.len(),
            running: self.grid.is_running(),
            total: self.grid.total_cost(),
            per_second: self.grid.cost_per_second(),
        })
    }

    async fn kill_all(&self) -> Result<Vec<usize>, ApiError> {
        let live: Vec<usize> = self
            .grid
            .snapshots()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state != TaskState::Dead)
            .map(|(i, _)| i)
            .collect();
        self.grid.kill_all().await.map_err(ApiError::from_core)?;
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stratus_core::{
        ClientFactory, GridConfig, Task, TaskContext, TaskSettings,
        testing::{CallLog, RecordingInvoker, StaticCapacity, StubConnector, StubCoordinator, StubProbe},
    };
    use stratus_model::{Algorithm, LogisticRegression, TaskId, TaskSpec, TaskState};

    use super::*;

    fn grid(n: u32) -> (Arc<StubProbe>, Arc<GridSearch>) {
        let log = CallLog::default();
        let probe = Arc::new(StubProbe::default());
        let clients = Arc::new(ClientFactory::new(Arc::new(StubConnector::new(
            Arc::new(RecordingInvoker::new(log.clone())),
            Arc::new(StaticCapacity::new(1000)),
        ))));
        let settings = TaskSettings::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_grace(Duration::from_secs(1));
        let ctx = TaskContext::new(probe.clone(), Arc::clone(&clients)).with_settings(settings);
        let tasks = (0..n)
            .map(|i| {
                let spec = TaskSpec::new(
                    format!("exp-{i}"),
                    1,
                    Algorithm::LogisticRegression(LogisticRegression::new(13)),
                )
                .with_bucket("criteo");
                let coordinator = Arc::new(StubCoordinator::new(3000 + i as u16, log.clone()));
                Task::new(TaskId(i), spec, coordinator, ctx.clone()).unwrap()
            })
            .collect();
        let cfg = GridConfig::default()
            .with_per_task_capacity(10)
            .with_pass_interval(Duration::from_millis(200));
        (probe, Arc::new(GridSearch::new(tasks, clients, cfg)))
    }

    #[tokio::test(start_paused = true)]
    async fn lists_and_indexes_experiments() {
        let (_, grid) = grid(2);
        let api = GridApiAdapter::new(grid);

        let all = api.experiments().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].name, "exp-1");
        assert_eq!(api.experiment(0).await.unwrap().id, TaskId(0));
        assert!(matches!(api.experiment(7).await, Err(ApiError::NotFound(7))));
        assert!(matches!(api.kill(7).await, Err(ApiError::NotFound(7))));
    }

    #[tokio::test(start_paused = true)]
    async fn running_grid_reports_top_and_cost() {
        let (probe, grid) = grid(2);
        probe.set_connected(1);
        probe.set_time_loss(5.0, 0.4);
        grid.run().await.unwrap();
        let api = GridApiAdapter::new(Arc::clone(&grid));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let top = api.top(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].last_loss, Some(0.4));

        let cost = api.cost().await.unwrap();
        assert_eq!(cost.experiments, 2);
        assert!(cost.running);
        assert!(cost.total > 0.0);
        assert!(cost.per_second > 0.0);

        assert_eq!(api.kill_all().await.unwrap(), vec![0, 1]);
        let after = api.experiments().await.unwrap();
        assert!(after.iter().all(|s| s.state == TaskState::Dead));
        assert_eq!(api.cost().await.unwrap().per_second, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn kill_all_reports_only_tasks_it_stopped() {
        let (probe, grid) = grid(3);
        probe.set_connected(1);
        grid.run().await.unwrap();
        let api = GridApiAdapter::new(grid);

        api.kill(1).await.unwrap();
        assert_eq!(api.kill_all().await.unwrap(), vec![0, 2]);
        assert!(api.kill_all().await.unwrap().is_empty());
    }
}
