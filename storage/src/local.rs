use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

const ENGINE: &str = "local";

fn io_error(err: std::io::Error) -> StorageError {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
        _ => StorageErrorKind::Io,
    };
    StorageError::new(ENGINE, kind, err)
}

/// Storage driver backed by the local filesystem.
///
/// Objects live under `<root>/<bucket>/b/<path>`. Uploads are staged to a
/// hidden temporary file in the destination directory and renamed into
/// place, so a concurrent reader never observes a partially written object
/// and concurrent writers of the same path converge on a complete one.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at the given directory.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path.push(remote);
        path
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let remote = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(remote).await.map_err(io_error)?;
        // Not every filesystem records a birth time; fall back to mtime.
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(io_error)?;
        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);
        tokio::fs::remove_file(remote).await.map_err(io_error)?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let dest = self.path(bucket, remote);

        let parent = dest
            .parent()
            .ok_or_else(|| {
                StorageError::builder(
                    ENGINE,
                    StorageErrorKind::InvalidRequest,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
                )
                .bucket(bucket)
                .path(dest.as_str())
                .build()
            })?
            .to_owned();

        tokio::fs::create_dir_all(&parent).await.map_err(io_error)?;

        // Stage in the destination directory so the final rename cannot
        // cross a filesystem boundary.
        let staging = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));

        let result = async {
            let mut writer = tokio::io::BufWriter::new(
                tokio::fs::File::create(&staging).await.map_err(io_error)?,
            );
            tokio::io::copy(reader, &mut writer)
                .await
                .map_err(io_error)?;
            writer.shutdown().await.map_err(io_error)?;
            tokio::fs::rename(&staging, &dest).await.map_err(io_error)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }

        result
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&remote).await.map_err(io_error)?,
        );

        tokio::io::copy(&mut reader, writer)
            .await
            .map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let mut base = self.root.join(bucket);
        base.push("b");

        let mut target = base.clone();
        if let Some(part) = prefix {
            target.push(part);
        }

        if tokio::fs::metadata(&target).await.is_err() {
            return Ok(Vec::new());
        }

        let items = tokio::task::spawn_blocking(move || collect_files(&target))
            .in_current_span()
            .await
            .map_err(|err| StorageError::new(ENGINE, StorageErrorKind::Other, err))?
            .map_err(io_error)?;

        tracing::debug!("Found {} entries", items.len());

        Ok(items
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(&base)
                    .ok()
                    .map(|rel| rel.as_str().to_string())
            })
            .filter(|name| {
                // Staging files are not published objects.
                !Utf8Path::new(name)
                    .file_name()
                    .is_some_and(|f| f.starts_with(".tmp-"))
            })
            .collect())
    }
}

fn collect_files(path: &Utf8Path) -> std::io::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    visit(path, &mut files)?;
    Ok(files)
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> std::io::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, LocalDriver::new(root))
    }

    async fn put(driver: &LocalDriver, path: &str, data: &[u8]) {
        let mut reader = BufReader::new(data);
        driver
            .upload("registry", Utf8Path::new(path), &mut reader)
            .await
            .unwrap();
    }

    async fn get(driver: &LocalDriver, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut out);
        driver
            .download("registry", Utf8Path::new(path), &mut cursor)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn roundtrip_and_metadata() {
        let (_dir, driver) = driver();
        put(&driver, "blobs/sha256/abc", b"payload").await;

        assert_eq!(get(&driver, "blobs/sha256/abc").await, b"payload");
        let meta = driver
            .metadata("registry", Utf8Path::new("blobs/sha256/abc"))
            .await
            .unwrap();
        assert_eq!(meta.size, 7);
    }

    #[tokio::test]
    async fn overwrite_is_atomic_replacement() {
        let (_dir, driver) = driver();
        put(&driver, "tags/app/latest", b"sha256:one").await;
        put(&driver, "tags/app/latest", b"sha256:two").await;
        assert_eq!(get(&driver, "tags/app/latest").await, b"sha256:two");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, driver) = driver();
        let err = driver
            .metadata("registry", Utf8Path::new("blobs/sha256/missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_returns_prefixed_paths_without_staging_files() {
        let (_dir, driver) = driver();
        put(&driver, "tags/app/v1", b"d").await;
        put(&driver, "tags/app/v2", b"d").await;
        put(&driver, "blobs/sha256/aa", b"d").await;

        let mut listed = driver
            .list("registry", Some(Utf8Path::new("tags/app")))
            .await
            .unwrap();
        listed.sort();
        assert_eq!(listed, vec!["tags/app/v1", "tags/app/v2"]);

        let empty = driver
            .list("registry", Some(Utf8Path::new("tags/none")))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
