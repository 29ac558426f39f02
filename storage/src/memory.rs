use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

const ENGINE: &str = "memory";

fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Bucket not found: {bucket}"),
        ),
    )
    .bucket(bucket)
    .build()
}

fn path_not_found(bucket: &str, remote: &Utf8Path) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Path not found: {remote}"),
        ),
    )
    .bucket(bucket)
    .path(remote.as_str())
    .build()
}

fn io_error(err: std::io::Error) -> StorageError {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
        _ => StorageErrorKind::Io,
    };
    StorageError::new(ENGINE, kind, err)
}

#[derive(Debug)]
struct MemoryItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryItem> for Metadata {
    fn from(value: &MemoryItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

/// Storage driver that keeps all objects in process memory.
///
/// Uploads replace the stored object under a write lock, so readers never
/// observe a partial write. Buckets are created implicitly on first upload.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, HashMap<Utf8PathBuf, MemoryItem>>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let mut map = HashMap::new();
        for bucket in buckets {
            map.insert(bucket.to_string(), HashMap::new());
        }

        Self {
            buckets: RwLock::new(map),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let items = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        Ok(items
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?
            .into())
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let items = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        items
            .remove(remote)
            .map(|_| ())
            .ok_or_else(|| path_not_found(bucket, remote))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        tokio::io::copy(reader, &mut buf).await.map_err(io_error)?;
        buf.shutdown().await.map_err(io_error)?;

        let mut buckets = self.buckets.write().await;
        let items = buckets.entry(bucket.to_string()).or_default();
        items.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let items = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let mut data = items
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?
            .data
            .as_slice();

        tokio::io::copy(&mut data, writer).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let items = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;

        let mut paths = Vec::new();
        for path in items.keys() {
            match prefix {
                Some(prefix) if !path.starts_with(prefix) => {}
                _ => paths.push(path.to_string()),
            }
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn put(storage: &MemoryStorage, bucket: &str, path: &str, data: &[u8]) {
        let mut reader = BufReader::new(data);
        storage
            .upload(bucket, Utf8Path::new(path), &mut reader)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let storage = MemoryStorage::new();
        put(&storage, "b", "a/file", b"hello").await;

        let mut out = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut out);
        storage
            .download("b", Utf8Path::new("a/file"), &mut cursor)
            .await
            .unwrap();
        assert_eq!(out, b"hello");

        let meta = storage.metadata("b", Utf8Path::new("a/file")).await.unwrap();
        assert_eq!(meta.size, 5);
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() {
        let storage = MemoryStorage::with_buckets(&["b"]);
        let err = storage
            .metadata("b", Utf8Path::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = storage
            .metadata("missing-bucket", Utf8Path::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let storage = MemoryStorage::new();
        put(&storage, "b", "x", b"1").await;
        storage.delete("b", Utf8Path::new("x")).await.unwrap();
        let err = storage.delete("b", Utf8Path::new("x")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_honors_prefix_components() {
        let storage = MemoryStorage::new();
        put(&storage, "b", "tags/team/app/v1", b"d").await;
        put(&storage, "b", "tags/team/app2/v1", b"d").await;

        let listed = storage
            .list("b", Some(Utf8Path::new("tags/team/app")))
            .await
            .unwrap();
        assert_eq!(listed, vec!["tags/team/app/v1".to_string()]);
    }
}
