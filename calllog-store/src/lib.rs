use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use calllog_types::CallLogEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;
pub use memory::InMemoryCallLogStore;

pub mod jsonl;
pub use jsonl::JsonlCallLogStore;

pub type RowId = u64;

#[derive(Debug, Error)]
#[error("store error: {message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::new(e.to_string())
    }
}

/// A persisted row: the entry plus the id the store assigned it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCall {
    pub id: RowId,
    #[serde(flatten)]
    pub entry: CallLogEntry,
}

/// The system call-log store, seen as an opaque record store.
#[async_trait]
pub trait CallLogStore: Send + Sync {
    /// Insert a single row.
    async fn insert(&self, entry: &CallLogEntry) -> Result<RowId, StoreError>;

    /// Insert many rows in one call. Returns the number of rows persisted.
    async fn bulk_insert(&self, entries: &[CallLogEntry]) -> Result<usize, StoreError>;

    /// Delete every row. Returns the number of rows removed.
    async fn delete_all(&self) -> Result<usize, StoreError>;
}

/// How a decoded batch is handed to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsertStrategy {
    /// One multi-row insert.
    #[default]
    Bulk,
    /// One insert per entry; stops at the first failure.
    PerRow,
}

#[derive(Debug, Error)]
#[error("unknown insert strategy: {0}")]
pub struct ParseStrategyError(pub String);

impl FromStr for InsertStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bulk" => Ok(InsertStrategy::Bulk),
            "per-row" | "per_row" | "row" => Ok(InsertStrategy::PerRow),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

impl fmt::Display for InsertStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertStrategy::Bulk => f.write_str("bulk"),
            InsertStrategy::PerRow => f.write_str("per-row"),
        }
    }
}

/// Write `entries` with the given strategy and report how many rows landed.
pub async fn persist(
    store: &dyn CallLogStore,
    entries: &[CallLogEntry],
    strategy: InsertStrategy,
) -> Result<usize, StoreError> {
    match strategy {
        InsertStrategy::Bulk => store.bulk_insert(entries).await,
        InsertStrategy::PerRow => {
            let mut inserted = 0;
            for entry in entries {
                store.insert(entry).await?;
                inserted += 1;
            }
            Ok(inserted)
        }
    }
}
