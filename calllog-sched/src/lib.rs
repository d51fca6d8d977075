use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use calllog_codec::decode_batch;
use calllog_store::{persist, CallLogStore, InsertStrategy};
use calllog_types::{WriteOperation, WriteRequest, WriteResult};
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Background execution seam: takes ownership of an authorized request and
/// completes it later, off the caller's task.
pub trait Executor: Send + Sync {
    fn submit(&self, request: WriteRequest);
}

/// Bounded worker pool over a shared call-log store.
///
/// Each request runs on its own task but holds one of `max_concurrent_writes`
/// permits while touching the store. No retries, no timeouts.
pub struct WriteExecutor {
    store: Arc<dyn CallLogStore>,
    strategy: InsertStrategy,
    permits: Arc<Semaphore>,
}

impl WriteExecutor {
    pub fn new(
        store: Arc<dyn CallLogStore>,
        max_concurrent_writes: usize,
        strategy: InsertStrategy,
    ) -> Self {
        Self {
            store,
            strategy,
            permits: Arc::new(Semaphore::new(max_concurrent_writes.max(1))),
        }
    }

    /// Spawn the request onto the runtime. The handle resolves after the
    /// result has been delivered to the request's sink.
    pub fn spawn(&self, request: WriteRequest) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let strategy = self.strategy;
        let span =
            tracing::info_span!("write", request_id = %request.id, action = %request.action());

        tokio::spawn(
            async move {
                // Only fails if the semaphore is closed, which never happens.
                let _permit = permits.acquire_owned().await.ok();
                let WriteRequest { operation, sink, .. } = request;
                let result = run(store.as_ref(), strategy, &operation).await;
                tracing::debug!(status = result.tag(), "write finished");
                sink.deliver(result);
            }
            .instrument(span),
        )
    }
}

impl Executor for WriteExecutor {
    fn submit(&self, request: WriteRequest) {
        let _ = self.spawn(request);
    }
}

/// Execute one operation to a terminal result. Never panics outward.
pub async fn run(
    store: &dyn CallLogStore,
    strategy: InsertStrategy,
    operation: &WriteOperation,
) -> WriteResult {
    match AssertUnwindSafe(execute(store, strategy, operation))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "store adapter panicked");
            WriteResult::OperationError(message)
        }
    }
}

async fn execute(
    store: &dyn CallLogStore,
    strategy: InsertStrategy,
    operation: &WriteOperation,
) -> WriteResult {
    match operation {
        WriteOperation::WriteBulk { records } => {
            let entries = match decode_batch(records) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(error = %e, "rejecting batch");
                    return WriteResult::DecodingError(e.to_string());
                }
            };
            match persist(store, &entries, strategy).await {
                Ok(inserted) => {
                    tracing::debug!(inserted, "inserted call log entries");
                    WriteResult::Ok(inserted)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "bulk write failed");
                    WriteResult::OperationError(e.message)
                }
            }
        }
        WriteOperation::Clear => match store.delete_all().await {
            Ok(deleted) => {
                tracing::debug!(deleted, "cleared call log");
                WriteResult::Ok(deleted)
            }
            Err(e) => {
                tracing::warn!(error = %e, "clear failed");
                WriteResult::OperationError(e.message)
            }
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "store adapter panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use calllog_store::{InMemoryCallLogStore, RowId, StoreError};
    use calllog_types::CallLogEntry;
    use serde_json::json;

    fn record(number: &str) -> serde_json::Value {
        json!({"number": number, "date": 1, "duration": 2, "type": 3, "new": 1, "is_read": 0})
    }

    /// Fails on the `fail_at`-th row insert; counts overlapping calls.
    struct FlakyStore {
        inner: InMemoryCallLogStore,
        fail_at: Option<usize>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FlakyStore {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                inner: InMemoryCallLogStore::new(),
                fail_at,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CallLogStore for FlakyStore {
        async fn insert(&self, entry: &CallLogEntry) -> Result<RowId, StoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_at {
                return Err(StoreError::new("constraint violation"));
            }
            self.inner.insert(entry).await
        }

        async fn bulk_insert(&self, entries: &[CallLogEntry]) -> Result<usize, StoreError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_at.is_some() {
                return Err(StoreError::new("disk full"));
            }
            self.inner.bulk_insert(entries).await
        }

        async fn delete_all(&self) -> Result<usize, StoreError> {
            panic!("delete exploded");
        }
    }

    #[tokio::test]
    async fn decode_failure_writes_nothing() {
        let store = InMemoryCallLogStore::new();
        let op = WriteOperation::WriteBulk {
            records: json!([record("1"), {"number": "2"}]),
        };
        let result = run(&store, InsertStrategy::Bulk, &op).await;
        assert!(matches!(result, WriteResult::DecodingError(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn per_row_failure_aborts_remaining_rows() {
        let store = FlakyStore::new(Some(1));
        let op = WriteOperation::WriteBulk {
            records: json!([record("1"), record("2"), record("3")]),
        };
        let result = run(&store, InsertStrategy::PerRow, &op).await;
        assert_eq!(result, WriteResult::OperationError("constraint violation".into()));
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn bulk_failure_is_operation_error() {
        let store = FlakyStore::new(Some(0));
        let op = WriteOperation::WriteBulk {
            records: json!([record("1")]),
        };
        let result = run(&store, InsertStrategy::Bulk, &op).await;
        assert_eq!(result, WriteResult::OperationError("disk full".into()));
    }

    #[tokio::test]
    async fn adapter_panic_becomes_operation_error() {
        let store = FlakyStore::new(None);
        let result = run(&store, InsertStrategy::Bulk, &WriteOperation::Clear).await;
        assert_eq!(result, WriteResult::OperationError("delete exploded".into()));
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_writes() {
        let store = Arc::new(FlakyStore::new(None));
        let exec = WriteExecutor::new(store.clone(), 2, InsertStrategy::Bulk);

        let mut receivers = Vec::new();
        let mut handles = Vec::new();
        for i in 0..6 {
            let (req, rx) = WriteRequest::new(
                WriteOperation::WriteBulk {
                    records: json!([record(&i.to_string())]),
                },
                true,
            );
            handles.push(exec.spawn(req));
            receivers.push(rx);
        }
        for h in handles {
            h.await.unwrap();
        }
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), WriteResult::Ok(1));
        }
        assert!(store.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(store.inner.len().await, 6);
    }
}
