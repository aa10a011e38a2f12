use std::sync::Arc;

use stratus_exec::Invoker;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    error::{ClientKind, CoreError},
    platform::{CapacityProbe, Connector},
};

/// Initialise-once cache of remote-service clients, one cell per kind.
///
/// Concurrent first access is serialised into a single construction; a failed
/// construction leaves the cell empty so the next caller tries again.
pub struct ClientFactory {
    connector: Arc<dyn Connector>,
    invoker: OnceCell<Arc<dyn Invoker>>,
    capacity: OnceCell<Arc<dyn CapacityProbe>>,
}

impl ClientFactory {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            invoker: OnceCell::new(),
            capacity: OnceCell::new(),
        }
    }

    pub async fn invoker(&self) -> Result<Arc<dyn Invoker>, CoreError> {
        self.invoker
            .get_or_try_init(|| async {
                debug!(kind = %ClientKind::Invoker, "constructing client");
                self.connector
                    .invoker()
                    .await
                    .map_err(|e| CoreError::Client {
                        kind: ClientKind::Invoker,
                        reason: e.to_string(),
                    })
            })
            .await
            .cloned()
    }

    pub async fn capacity(&self) -> Result<Arc<dyn CapacityProbe>, CoreError> {
        self.capacity
            .get_or_try_init(|| async {
                debug!(kind = %ClientKind::Capacity, "constructing client");
                self.connector
                    .capacity()
                    .await
                    .map_err(|e| CoreError::Client {
                        kind: ClientKind::Capacity,
                        reason: e.to_string(),
                    })
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{CallLog, RecordingInvoker, StaticCapacity, StubConnector};

    fn connector() -> Arc<StubConnector> {
        Arc::new(StubConnector::new(
            Arc::new(RecordingInvoker::new(CallLog::default())),
            Arc::new(StaticCapacity::new(10)),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_builds_once() {
        let conn = connector();
        let factory = Arc::new(ClientFactory::new(conn.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let f = Arc::clone(&factory);
            handles.push(tokio::spawn(async move { f.invoker().await.is_ok() }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(conn.invoker_builds.load(Ordering::SeqCst), 1);
        assert_eq!(conn.capacity_builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_construction_is_retried() {
        let conn = connector();
        conn.fail_next.store(true, Ordering::SeqCst);
        let factory = ClientFactory::new(conn.clone());

        let err = factory.capacity().await.err().unwrap();
        assert!(matches!(err, CoreError::Client { kind: ClientKind::Capacity, .. }));

        let cap = factory.capacity().await.unwrap();
        assert_eq!(cap.available_concurrency().await.unwrap(), 10);
        assert_eq!(conn.capacity_builds.load(Ordering::SeqCst), 2);
    }
}
