//! Dataset preprocessing fanned out over data chunks.
//!
//! Every chunk of every experiment's train and test ranges gets one
//! preprocessing invocation. Experiments sharing a bucket share its chunks, so
//! a chunk is only processed once per run.
use std::collections::{BTreeMap, BTreeSet};

use stratus_exec::{LaunchConfig, LaunchReport, Launcher};
use stratus_model::{DatasetRef, Invocation, PreprocessPayload};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{clients::ClientFactory, error::CoreError};

/// Distinct chunk ids per bucket across `datasets`.
pub fn chunks_by_bucket<'a>(
    datasets: impl IntoIterator<Item = &'a DatasetRef>,
) -> BTreeMap<String, BTreeSet<u32>> {
    let mut out: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    for ds in datasets {
        let chunks = out.entry(ds.bucket.clone()).or_default();
        for (first, last) in [ds.train_set, ds.test_set] {
            chunks.extend(first..=last);
        }
    }
    out
}

/// Launches one preprocessing invocation per chunk and waits for all of them.
///
/// Chunks not started before `cancel` fires are reported as skipped. Any
/// chunk that failed permanently fails the whole call.
pub async fn preprocess<'a>(
    datasets: impl IntoIterator<Item = &'a DatasetRef>,
    clients: &ClientFactory,
    cfg: &LaunchConfig,
    cancel: Option<&CancellationToken>,
) -> Result<LaunchReport, CoreError> {
    let buckets = chunks_by_bucket(datasets);
    let launcher = Launcher::new(clients.invoker().await?, cfg.clone());

    let mut total = LaunchReport::default();
    for (bucket, chunks) in &buckets {
        let report = launcher
            .launch(chunks.iter().copied(), cancel, |chunk_id, dupe_nonce| {
                Invocation::Preprocess(PreprocessPayload {
                    chunk_id,
                    bucket: bucket.clone(),
                    dupe_nonce,
                })
            })
            .await;
        info!(
            bucket = %bucket,
            launched = report.launched,
            skipped = report.skipped,
            failed = report.failures.len(),
            "preprocessing fanned out"
        );
        for failure in &report.failures {
            warn!(bucket = %bucket, chunk = failure.target, error = %failure.error, "chunk preprocessing failed");
        }
        total.requested += report.requested;
        total.launched += report.launched;
        total.skipped += report.skipped;
        total.failures.extend(report.failures);
    }

    if !total.failures.is_empty() {
        return Err(CoreError::Preprocess {
            failed: total.failures.len(),
            chunks: total.requested,
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stratus_exec::InvokeError;
    use stratus_model::RetryPolicy;

    use super::*;
    use crate::testing::{CallLog, RecordingInvoker, StaticCapacity, StubConnector};

    fn dataset(bucket: &str, train: (u32, u32), test: (u32, u32)) -> DatasetRef {
        DatasetRef {
            bucket: bucket.into(),
            train_set: train,
            test_set: test,
            ..DatasetRef::default()
        }
    }

    fn clients(invoker: Arc<RecordingInvoker>) -> ClientFactory {
        ClientFactory::new(Arc::new(StubConnector::new(
            invoker,
            Arc::new(StaticCapacity::new(100)),
        )))
    }

    fn launch_cfg() -> LaunchConfig {
        LaunchConfig::default().with_retry(RetryPolicy::immediate(2))
    }

    #[test]
    fn shared_chunks_are_listed_once() {
        let a = dataset("criteo", (0, 3), (4, 4));
        let b = dataset("criteo", (2, 5), (6, 6));
        let c = dataset("movielens", (0, 1), (2, 2));
        let map = chunks_by_bucket([&a, &b, &c]);

        assert_eq!(map["criteo"].iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(map["movielens"].len(), 3);
    }

    #[tokio::test]
    async fn one_invocation_per_chunk() {
        let log = CallLog::default();
        let invoker = Arc::new(RecordingInvoker::new(log.clone()));
        let ds = dataset("criteo", (0, 2), (3, 3));

        let report = preprocess([&ds, &ds], &clients(invoker), &launch_cfg(), None)
            .await
            .unwrap();
        assert_eq!((report.requested, report.launched), (4, 4));

        let mut chunks: Vec<_> = log
            .invocations()
            .into_iter()
            .map(|inv| match inv {
                Invocation::Preprocess(p) => {
                    assert_eq!(p.bucket, "criteo");
                    p.chunk_id
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        chunks.sort_unstable();
        assert_eq!(chunks, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_chunk_fails_the_run() {
        let log = CallLog::default();
        let invoker = Arc::new(RecordingInvoker::new(log.clone()));
        invoker.fail_nth(0, InvokeError::Failed("bad chunk".into()));
        let ds = dataset("criteo", (0, 1), (2, 2));

        let err = preprocess([&ds], &clients(invoker), &launch_cfg(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Preprocess { failed: 1, chunks: 3 }), "{err}");
    }

    #[tokio::test]
    async fn cancelled_run_skips_every_chunk() {
        let log = CallLog::default();
        let invoker = Arc::new(RecordingInvoker::new(log.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ds = dataset("criteo", (0, 4), (5, 5));

        let report = preprocess([&ds], &clients(invoker), &launch_cfg(), Some(&cancel))
            .await
            .unwrap();
        assert_eq!(report.skipped, 6);
        assert!(log.invocations().is_empty());
    }
}
