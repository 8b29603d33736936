//! Remote object storage seam.
//!
//! Workers read their inputs from and write their outputs to an object
//! store addressed by `(bucket, path)`. [`ObjectStore`] is implemented by
//! the S3 provider in `quant-cloud` and by [`MemoryObjectStore`] for tests
//! and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

/// Errors returned by an [`ObjectStore`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: s3://{bucket}/{path}")]
    NotFound { bucket: String, path: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Minimal read/write access to remote object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the full contents of `bucket/path`.
    async fn read_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace `bucket/path` with `data`.
    async fn write_object(&self, bucket: &str, path: &str, data: Vec<u8>)
        -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Object store kept in process memory.
///
/// Records every read and write so callers can assert on what was (or was
/// not) touched.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    reads: Mutex<Vec<(String, String)>>,
    writes: Mutex<Vec<(String, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording it as a write.
    pub fn insert(&self, bucket: &str, path: &str, data: impl Into<Vec<u8>>) {
        lock(&self.objects).insert(key(bucket, path), data.into());
    }

    /// Current contents of `bucket/path`, if present.
    pub fn get(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(&key(bucket, path)).cloned()
    }

    /// Every `(bucket, path)` read so far, in call order.
    pub fn reads(&self) -> Vec<(String, String)> {
        lock(&self.reads).clone()
    }

    /// Every `(bucket, path)` written so far, in call order.
    pub fn writes(&self) -> Vec<(String, String)> {
        lock(&self.writes).clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn read_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        lock(&self.reads).push(key(bucket, path));
        lock(&self.objects)
            .get(&key(bucket, path))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
    }

    async fn write_object(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        lock(&self.writes).push(key(bucket, path));
        lock(&self.objects).insert(key(bucket, path), data);
        Ok(())
    }
}

fn key(bucket: &str, path: &str) -> (String, String) {
    (bucket.to_string(), path.to_string())
}

/// A poisoned lock only means another test thread panicked; the map is
/// still usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.read_object("bucket", "missing.csv").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Object not found: s3://bucket/missing.csv");
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = MemoryObjectStore::new();
        store
            .write_object("bucket", "out/file.csv", b"hello".to_vec())
            .await
            .unwrap();
        let data = store.read_object("bucket", "out/file.csv").await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(store.writes(), vec![key("bucket", "out/file.csv")]);
        assert_eq!(store.reads(), vec![key("bucket", "out/file.csv")]);
    }

    #[test]
    fn seeded_objects_are_not_recorded_as_writes() {
        let store = MemoryObjectStore::new();
        store.insert("bucket", "in.csv", "data");
        assert_eq!(store.get("bucket", "in.csv").as_deref(), Some(&b"data"[..]));
        assert!(store.writes().is_empty());
    }

    #[test]
    fn backend_error_is_not_not_found() {
        assert!(!StorageError::Backend("throttled".into()).is_not_found());
    }
}
