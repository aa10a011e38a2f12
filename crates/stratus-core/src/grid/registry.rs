use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::GridSearch;

/// Process-wide set of running grid searches.
///
/// A search is added when its run starts and removed by its `kill_all`.
/// Cloning shares the same set.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<Uuid, Arc<GridSearch>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, grid: Arc<GridSearch>) {
        self.lock().insert(grid.id(), grid);
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<GridSearch>> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<GridSearch>> {
        self.lock().get(&id).cloned()
    }

    pub fn running(&self) -> Vec<Arc<GridSearch>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Kills every registered grid search and waits until all are dead.
    pub async fn stop_everything(&self) -> usize {
        let grids: Vec<_> = self.lock().drain().map(|(_, g)| g).collect();
        let count = grids.len();
        info!(count, "stopping every running grid search");

        let mut set = JoinSet::new();
        for grid in grids {
            set.spawn(async move {
                let id = grid.id();
                (id, grid.kill_all().await)
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => warn!(grid = %id, error = %e, "grid search did not stop cleanly"),
                Err(e) => warn!(error = %e, "grid search stop aborted"),
            }
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<GridSearch>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
