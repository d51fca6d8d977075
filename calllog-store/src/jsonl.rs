use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calllog_types::CallLogEntry;

use crate::{CallLogStore, RowId, StoreError, StoredCall};

/// File-backed store: one JSON object per line.
///
/// Used by the CLI as a stand-in for the device's call log. File access runs
/// on the blocking pool. A row only counts once its terminating newline is on
/// disk; an unterminated final line is a torn append and is dropped on open.
pub struct JsonlCallLogStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    next_id: Mutex<RowId>,
}

/// Result of reading the file: complete rows and the byte length they span.
struct Scan {
    rows: Vec<StoredCall>,
    valid_len: u64,
    file_len: u64,
}

impl JsonlCallLogStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let scan = scan(&path)?;
        if scan.valid_len < scan.file_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = scan.file_len - scan.valid_len,
                "truncating torn trailing row"
            );
            OpenOptions::new()
                .write(true)
                .open(&path)?
                .set_len(scan.valid_len)?;
        }
        let last_id = scan.rows.iter().map(|r| r.id).max().unwrap_or(0);
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                next_id: Mutex::new(last_id + 1),
            }),
        })
    }

    /// Every complete row currently on disk (debug hook).
    pub fn rows(&self) -> Result<Vec<StoredCall>, StoreError> {
        Ok(scan(&self.inner.path)?.rows)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| StoreError::new(e.to_string()))?
    }
}

impl Inner {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RowId>, StoreError> {
        self.next_id
            .lock()
            .map_err(|_| StoreError::new("lock poisoned"))
    }

    fn append(&self, entries: &[CallLogEntry]) -> Result<RowId, StoreError> {
        let mut next = self.lock()?;

        let mut buf = Vec::new();
        let mut id = *next;
        for entry in entries {
            let row = StoredCall {
                id,
                entry: entry.clone(),
            };
            serde_json::to_writer(&mut buf, &row).map_err(|e| StoreError::new(e.to_string()))?;
            buf.push(b'\n');
            id += 1;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let start = file.metadata()?.len();
        if let Err(e) = file.write_all(&buf).and_then(|_| file.flush()) {
            // Drop whatever part of the batch reached the file.
            let _ = file.set_len(start);
            return Err(e.into());
        }

        let first = *next;
        *next = id;
        Ok(first)
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let _guard = self.lock()?;
        if !self.path.exists() {
            return Ok(0);
        }
        let bytes = fs::read(&self.path)?;
        let removed = complete_lines(&bytes)
            .filter(|line| !is_blank(line))
            .count();
        fs::File::create(&self.path)?;
        tracing::trace!(path = %self.path.display(), removed, "truncated call log file");
        Ok(removed)
    }
}

#[async_trait]
impl CallLogStore for JsonlCallLogStore {
    async fn insert(&self, entry: &CallLogEntry) -> Result<RowId, StoreError> {
        let entry = entry.clone();
        self.blocking(move |inner| inner.append(std::slice::from_ref(&entry)))
            .await
    }

    async fn bulk_insert(&self, entries: &[CallLogEntry]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let entries = entries.to_vec();
        self.blocking(move |inner| {
            inner.append(&entries)?;
            Ok(entries.len())
        })
        .await
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        self.blocking(|inner| inner.delete_all()).await
    }
}

/// Newline-terminated lines, without the newline. A trailing fragment is skipped.
fn complete_lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split_inclusive(|b| *b == b'\n')
        .filter_map(|line| line.strip_suffix(b"\n"))
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn scan(path: &Path) -> Result<Scan, StoreError> {
    if !path.exists() {
        return Ok(Scan {
            rows: Vec::new(),
            valid_len: 0,
            file_len: 0,
        });
    }
    let bytes = fs::read(path)?;
    let mut rows = Vec::new();
    let mut valid_len = 0u64;
    for (n, line) in complete_lines(&bytes).enumerate() {
        valid_len += line.len() as u64 + 1;
        if is_blank(line) {
            continue;
        }
        let row: StoredCall = serde_json::from_slice(line)
            .map_err(|e| StoreError::new(format!("corrupt row at line {}: {e}", n + 1)))?;
        rows.push(row);
    }
    Ok(Scan {
        rows,
        valid_len,
        file_len: bytes.len() as u64,
    })
}
