use async_trait::async_trait;
use calllog_types::CallLogEntry;
use tokio::sync::Mutex;

use crate::{CallLogStore, RowId, StoreError, StoredCall};

/// Non-durable store for tests and dry runs.
pub struct InMemoryCallLogStore {
    inner: Mutex<Inner>,
}

struct Inner {
    next_id: RowId,
    rows: Vec<StoredCall>,
}

impl Inner {
    fn push(&mut self, entry: CallLogEntry) -> RowId {
        let id = self.next_id;
        self.next_id += 1;
        self.rows.push(StoredCall { id, entry });
        id
    }
}

impl Default for InMemoryCallLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCallLogStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                rows: Vec::new(),
            }),
        }
    }

    /// Pre-populated store.
    pub fn with_entries(entries: impl IntoIterator<Item = CallLogEntry>) -> Self {
        let mut inner = Inner {
            next_id: 1,
            rows: Vec::new(),
        };
        for entry in entries {
            inner.push(entry);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Snapshot of every row (debug hook).
    pub async fn rows(&self) -> Vec<StoredCall> {
        self.inner.lock().await.rows.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CallLogStore for InMemoryCallLogStore {
    async fn insert(&self, entry: &CallLogEntry) -> Result<RowId, StoreError> {
        Ok(self.inner.lock().await.push(entry.clone()))
    }

    async fn bulk_insert(&self, entries: &[CallLogEntry]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        for entry in entries {
            inner.push(entry.clone());
        }
        Ok(entries.len())
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        let removed = inner.rows.len();
        inner.rows.clear();
        Ok(removed)
    }
}
