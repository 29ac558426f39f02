//! Content-addressed blob and manifest storage.
//!
//! Blobs are stored under `blobs/sha256/<hex>` so that the path is fully
//! determined by the content. Manifests are stored by digest under
//! `manifests/<repository>/<digest>`, and tags are small pointer files under
//! `tags/<repository>/<tag>` whose content is the digest string.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use storage::Storage;

use crate::digest::{Digest, Reference, RepositoryName};
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::ManifestDocument;
use crate::metrics;

/// Content-addressed store backing the registry API.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    storage: Storage,
    bucket: String,
}

impl RegistryStore {
    /// Create a new store over a storage backend and bucket.
    pub fn new(storage: Storage, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
        }
    }

    fn blob_path(digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("blobs/sha256/{}", digest.hex()))
    }

    fn manifest_path(repository: &RepositoryName, digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("manifests/{repository}/{digest}"))
    }

    fn tag_path(repository: &RepositoryName, tag: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("tags/{repository}/{tag}"))
    }

    async fn read_all(&self, path: &Utf8Path) -> RegistryResult<Vec<u8>> {
        let mut data = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut data);
        self.storage.download(&self.bucket, path, &mut cursor).await?;
        Ok(data)
    }

    async fn write_all(&self, path: &Utf8Path, data: &[u8]) -> RegistryResult<()> {
        let mut reader = data;
        self.storage.upload(&self.bucket, path, &mut reader).await?;
        Ok(())
    }

    /// Check whether a blob with the given digest is stored.
    pub async fn blob_exists(&self, digest: &Digest) -> RegistryResult<bool> {
        match self.storage.metadata(&self.bucket, &Self::blob_path(digest)).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Fetch a blob by digest.
    pub async fn get_blob(&self, digest: &Digest) -> RegistryResult<Vec<u8>> {
        let path = Self::blob_path(digest);
        match self.read_all(&path).await {
            Ok(data) => Ok(data),
            Err(RegistryError::Storage(error)) if error.is_not_found() => {
                Err(RegistryError::BlobNotFound(digest.to_string()))
            }
            Err(error) => Err(error),
        }
    }

    /// Size of a stored blob, if present.
    pub async fn blob_size(&self, digest: &Digest) -> RegistryResult<u64> {
        match self.storage.metadata(&self.bucket, &Self::blob_path(digest)).await {
            Ok(metadata) => Ok(metadata.size),
            Err(error) if error.is_not_found() => {
                Err(RegistryError::BlobNotFound(digest.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Store a blob, verifying the content against the claimed digest.
    ///
    /// Storing a blob that already exists is a no-op, so concurrent pushes of
    /// identical content converge without coordination.
    #[tracing::instrument(skip(self, data), fields(digest = %digest, size = data.len()))]
    pub async fn put_blob(&self, digest: &Digest, data: &[u8]) -> RegistryResult<()> {
        let actual = Digest::of_bytes(data);
        if actual != *digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        // The path is derived from the content, so a concurrent writer that
        // wins the race wrote the same bytes we would have.
        if self.blob_exists(digest).await? {
            tracing::debug!("blob already stored");
            return Ok(());
        }

        self.write_all(&Self::blob_path(digest), data).await?;
        metrics::BLOBS_STORED.inc();
        metrics::BLOB_BYTES_STORED.inc_by(data.len() as u64);
        tracing::info!("stored blob");
        Ok(())
    }

    /// Delete a blob by digest.
    ///
    /// This does not check for manifests referencing the blob; deletion is an
    /// administrative operation.
    pub async fn delete_blob(&self, digest: &Digest) -> RegistryResult<()> {
        match self.storage.delete(&self.bucket, &Self::blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_not_found() => {
                Err(RegistryError::BlobNotFound(digest.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Store a manifest under a tag or digest reference.
    ///
    /// The manifest body is validated, every blob it references must already
    /// be stored, and the manifest document is written before the tag pointer
    /// so a reader never sees a tag for a missing manifest.
    #[tracing::instrument(skip(self, data), fields(repository = %repository, reference = %reference))]
    pub async fn put_manifest(
        &self,
        repository: &RepositoryName,
        reference: &Reference,
        data: &[u8],
    ) -> RegistryResult<Digest> {
        let digest = Digest::of_bytes(data);
        if let Reference::Digest(claimed) = reference {
            if *claimed != digest {
                return Err(RegistryError::DigestMismatch {
                    expected: claimed.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        let document = ManifestDocument::parse(data)?;
        for referent in document.referenced_digests() {
            if !self.blob_exists(&referent).await? {
                return Err(RegistryError::MissingReferent(referent.to_string()));
            }
        }

        self.write_all(&Self::manifest_path(repository, &digest), data)
            .await?;

        if let Reference::Tag(tag) = reference {
            self.write_all(
                &Self::tag_path(repository, tag),
                digest.to_string().as_bytes(),
            )
            .await?;
        }

        tracing::info!(digest = %digest, "stored manifest");
        Ok(digest)
    }

    /// Resolve a tag to its digest.
    pub async fn resolve_tag(
        &self,
        repository: &RepositoryName,
        tag: &str,
    ) -> RegistryResult<Digest> {
        let path = Self::tag_path(repository, tag);
        let data = match self.read_all(&path).await {
            Ok(data) => data,
            Err(RegistryError::Storage(error)) if error.is_not_found() => {
                return Err(RegistryError::ManifestNotFound(format!("{repository}:{tag}")));
            }
            Err(error) => return Err(error),
        };
        let text = String::from_utf8(data)
            .map_err(|_| RegistryError::InvalidDigest(format!("tag file for {repository}:{tag}")))?;
        Digest::parse(text.trim())
    }

    /// Fetch a manifest by tag or digest, returning its digest and body.
    pub async fn get_manifest(
        &self,
        repository: &RepositoryName,
        reference: &Reference,
    ) -> RegistryResult<(Digest, Vec<u8>)> {
        let digest = match reference {
            Reference::Digest(digest) => digest.clone(),
            Reference::Tag(tag) => self.resolve_tag(repository, tag).await?,
        };

        let path = Self::manifest_path(repository, &digest);
        match self.read_all(&path).await {
            Ok(data) => Ok((digest, data)),
            Err(RegistryError::Storage(error)) if error.is_not_found() => Err(
                RegistryError::ManifestNotFound(format!("{repository}@{digest}")),
            ),
            Err(error) => Err(error),
        }
    }

    /// Delete a manifest reference.
    ///
    /// Deleting a tag removes only the tag pointer; the manifest stays
    /// addressable by digest. Deleting by digest removes the manifest
    /// document itself. Blobs are never garbage collected here.
    pub async fn delete_manifest(
        &self,
        repository: &RepositoryName,
        reference: &Reference,
    ) -> RegistryResult<()> {
        match reference {
            Reference::Tag(tag) => {
                match self.storage.delete(&self.bucket, &Self::tag_path(repository, tag)).await {
                    Ok(()) => Ok(()),
                    Err(error) if error.is_not_found() => {
                        Err(RegistryError::TagNotFound(format!("{repository}:{tag}")))
                    }
                    Err(error) => Err(error.into()),
                }
            }
            Reference::Digest(digest) => {
                match self
                    .storage
                    .delete(&self.bucket, &Self::manifest_path(repository, digest))
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(error) if error.is_not_found() => Err(RegistryError::ManifestNotFound(
                        format!("{repository}@{digest}"),
                    )),
                    Err(error) => Err(error.into()),
                }
            }
        }
    }

    /// List objects under a prefix, treating a missing bucket as empty.
    async fn list_prefix(&self, prefix: &Utf8Path) -> RegistryResult<Vec<String>> {
        match self.storage.list(&self.bucket, Some(prefix)).await {
            Ok(entries) => Ok(entries),
            Err(error) if error.is_not_found() => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    /// List the tags in a repository, sorted lexicographically.
    pub async fn list_tags(&self, repository: &RepositoryName) -> RegistryResult<Vec<String>> {
        let prefix = Utf8PathBuf::from(format!("tags/{repository}"));
        let entries = self.list_prefix(&prefix).await?;
        let marker = format!("{prefix}/");
        let mut tags: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.strip_prefix(&marker))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(String::from)
            .collect();
        tags.sort();
        Ok(tags)
    }

    /// List every repository that has at least one manifest.
    pub async fn list_repositories(&self) -> RegistryResult<Vec<String>> {
        let entries = self.list_prefix(Utf8Path::new("manifests")).await?;
        let mut repositories = BTreeSet::new();
        for entry in entries {
            let Some(rest) = entry.strip_prefix("manifests/") else {
                continue;
            };
            // The final path segment is the manifest digest; everything
            // before it is the repository name.
            if let Some((repository, digest)) = rest.rsplit_once('/') {
                if Digest::parse(digest).is_ok() {
                    repositories.insert(repository.to_string());
                }
            }
        }
        Ok(repositories.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::StorageConfig;

    async fn store() -> RegistryStore {
        let storage = StorageConfig::Memory.build().await.unwrap();
        RegistryStore::new(storage, "registry")
    }

    fn repo(name: &str) -> RepositoryName {
        name.parse().unwrap()
    }

    fn manifest_with(blobs: &[&Digest]) -> Vec<u8> {
        let config = blobs.first().expect("at least one blob");
        let layers: Vec<serde_json::Value> = blobs[1..]
            .iter()
            .map(|digest| {
                serde_json::json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar",
                    "digest": digest.to_string(),
                    "size": 1,
                })
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config.to_string(),
                "size": 2,
            },
            "layers": layers,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn blob_roundtrip() {
        let store = store().await;
        let data = b"layer contents".to_vec();
        let digest = Digest::of_bytes(&data);

        assert!(!store.blob_exists(&digest).await.unwrap());
        store.put_blob(&digest, &data).await.unwrap();
        assert!(store.blob_exists(&digest).await.unwrap());
        assert_eq!(store.get_blob(&digest).await.unwrap(), data);
        assert_eq!(store.blob_size(&digest).await.unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn blob_digest_mismatch_stores_nothing() {
        let store = store().await;
        let claimed = Digest::of_bytes(b"something else");

        let error = store.put_blob(&claimed, b"actual data").await.unwrap_err();
        assert!(matches!(error, RegistryError::DigestMismatch { .. }));
        assert!(!store.blob_exists(&claimed).await.unwrap());
    }

    #[tokio::test]
    async fn blob_put_is_idempotent() {
        let store = store().await;
        let data = b"same bytes".to_vec();
        let digest = Digest::of_bytes(&data);

        store.put_blob(&digest, &data).await.unwrap();
        store.put_blob(&digest, &data).await.unwrap();
        assert_eq!(store.get_blob(&digest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn manifest_requires_stored_referents() {
        let store = store().await;
        let missing = Digest::of_bytes(b"never uploaded");
        let body = manifest_with(&[&missing]);
        let repository = repo("library/app");

        let error = store
            .put_manifest(&repository, &Reference::Tag("latest".into()), &body)
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::MissingReferent(_)));

        // Nothing was written, so the tag does not resolve.
        let error = store
            .get_manifest(&repository, &Reference::Tag("latest".into()))
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::ManifestNotFound(_)));
    }

    #[tokio::test]
    async fn manifest_roundtrip_by_tag_and_digest() {
        let store = store().await;
        let config = b"config blob".to_vec();
        let config_digest = Digest::of_bytes(&config);
        store.put_blob(&config_digest, &config).await.unwrap();

        let body = manifest_with(&[&config_digest]);
        let repository = repo("library/app");
        let digest = store
            .put_manifest(&repository, &Reference::Tag("v1".into()), &body)
            .await
            .unwrap();

        let (by_tag_digest, by_tag) = store
            .get_manifest(&repository, &Reference::Tag("v1".into()))
            .await
            .unwrap();
        assert_eq!(by_tag_digest, digest);
        assert_eq!(by_tag, body);

        let (_, by_digest) = store
            .get_manifest(&repository, &Reference::Digest(digest))
            .await
            .unwrap();
        assert_eq!(by_digest, body);
    }

    #[tokio::test]
    async fn tag_repoint_keeps_old_manifest_addressable() {
        let store = store().await;
        let repository = repo("app");

        let blob_a = b"first config".to_vec();
        let digest_a = Digest::of_bytes(&blob_a);
        store.put_blob(&digest_a, &blob_a).await.unwrap();
        let manifest_a = manifest_with(&[&digest_a]);

        let blob_b = b"second config".to_vec();
        let digest_b = Digest::of_bytes(&blob_b);
        store.put_blob(&digest_b, &blob_b).await.unwrap();
        let manifest_b = manifest_with(&[&digest_b]);

        let tag = Reference::Tag("latest".into());
        let first = store.put_manifest(&repository, &tag, &manifest_a).await.unwrap();
        let second = store.put_manifest(&repository, &tag, &manifest_b).await.unwrap();
        assert_ne!(first, second);

        let (resolved, body) = store.get_manifest(&repository, &tag).await.unwrap();
        assert_eq!(resolved, second);
        assert_eq!(body, manifest_b);

        // The first manifest is still reachable by digest.
        let (_, body) = store
            .get_manifest(&repository, &Reference::Digest(first))
            .await
            .unwrap();
        assert_eq!(body, manifest_a);
    }

    #[tokio::test]
    async fn deleting_tag_keeps_manifest() {
        let store = store().await;
        let repository = repo("app");
        let blob = b"config".to_vec();
        let blob_digest = Digest::of_bytes(&blob);
        store.put_blob(&blob_digest, &blob).await.unwrap();

        let body = manifest_with(&[&blob_digest]);
        let tag = Reference::Tag("stable".into());
        let digest = store.put_manifest(&repository, &tag, &body).await.unwrap();

        store.delete_manifest(&repository, &tag).await.unwrap();
        let error = store.get_manifest(&repository, &tag).await.unwrap_err();
        assert!(matches!(error, RegistryError::ManifestNotFound(_)));

        // Manifest and blob survive tag deletion.
        store
            .get_manifest(&repository, &Reference::Digest(digest))
            .await
            .unwrap();
        assert!(store.blob_exists(&blob_digest).await.unwrap());

        let error = store.delete_manifest(&repository, &tag).await.unwrap_err();
        assert!(matches!(error, RegistryError::TagNotFound(_)));
    }

    #[tokio::test]
    async fn tags_are_sorted() {
        let store = store().await;
        let repository = repo("app");
        let blob = b"config".to_vec();
        let blob_digest = Digest::of_bytes(&blob);
        store.put_blob(&blob_digest, &blob).await.unwrap();
        let body = manifest_with(&[&blob_digest]);

        for tag in ["zeta", "alpha", "mid"] {
            store
                .put_manifest(&repository, &Reference::Tag(tag.into()), &body)
                .await
                .unwrap();
        }

        assert_eq!(store.list_tags(&repository).await.unwrap(), ["alpha", "mid", "zeta"]);
        assert!(store.list_tags(&repo("empty")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_lists_repositories_once() {
        let store = store().await;
        let blob = b"config".to_vec();
        let blob_digest = Digest::of_bytes(&blob);
        store.put_blob(&blob_digest, &blob).await.unwrap();
        let body = manifest_with(&[&blob_digest]);

        for (name, tag) in [("library/app", "v1"), ("library/app", "v2"), ("tool", "latest")] {
            store
                .put_manifest(&repo(name), &Reference::Tag(tag.into()), &body)
                .await
                .unwrap();
        }

        assert_eq!(
            store.list_repositories().await.unwrap(),
            ["library/app", "tool"]
        );
    }
}
