//! Manifest documents and manifest, tag, and catalog endpoints.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::api::{AppState, ManifestPath, RepoPath};
use crate::auth::{Action, Identity};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

/// Media types accepted for manifest documents.
const MANIFEST_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
];

/// A descriptor referencing a blob by digest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the referenced blob.
    pub digest: Digest,
    /// Size of the referenced blob in bytes.
    pub size: u64,
}

/// Parsed manifest document.
///
/// Only the fields the registry validates are modeled; the stored bytes are
/// always the client's exact payload, so unknown fields survive untouched.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    /// Manifest schema version.
    pub schema_version: u32,
    /// Manifest media type.
    pub media_type: String,
    /// Descriptor for the configuration blob.
    pub config: Descriptor,
    /// Descriptors for the layer blobs.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ManifestDocument {
    /// Parse and validate a manifest body.
    pub fn parse(data: &[u8]) -> RegistryResult<Self> {
        let document: ManifestDocument = serde_json::from_slice(data)
            .map_err(|error| RegistryError::InvalidManifest(error.to_string()))?;
        if !MANIFEST_MEDIA_TYPES.contains(&document.media_type.as_str()) {
            return Err(RegistryError::UnsupportedManifestType(
                document.media_type.clone(),
            ));
        }
        Ok(document)
    }

    /// Every blob digest this manifest references.
    pub fn referenced_digests(&self) -> Vec<Digest> {
        let mut digests = Vec::with_capacity(1 + self.layers.len());
        digests.push(self.config.digest.clone());
        digests.extend(self.layers.iter().map(|layer| layer.digest.clone()));
        digests
    }
}

/// Routes for manifests, tags, and the catalog.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v2/{name}/manifests/{reference}",
            get(get_manifest)
                .head(head_manifest)
                .put(put_manifest)
                .delete(delete_manifest),
        )
        .route(
            "/v2/{group}/{name}/manifests/{reference}",
            get(get_manifest)
                .head(head_manifest)
                .put(put_manifest)
                .delete(delete_manifest),
        )
        .route("/v2/{name}/tags/list", get(list_tags))
        .route("/v2/{group}/{name}/tags/list", get(list_tags))
        .route("/v2/_catalog", get(catalog))
}

fn manifest_response(digest: &Digest, body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.oci.image.manifest.v1+json".to_owned(),
            ),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
        body,
    )
        .into_response()
}

async fn get_manifest(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ManifestPath {
        repository,
        reference,
    }: ManifestPath,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Pull)?;
    let (digest, body) = state.store.get_manifest(&repository, &reference).await?;
    Ok(manifest_response(&digest, body))
}

async fn head_manifest(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ManifestPath {
        repository,
        reference,
    }: ManifestPath,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Pull)?;
    let (digest, body) = state.store.get_manifest(&repository, &reference).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH, body.len().to_string()),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
    )
        .into_response())
}

async fn put_manifest(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ManifestPath {
        repository,
        reference,
    }: ManifestPath,
    body: Bytes,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Push)?;
    let digest = state
        .store
        .put_manifest(&repository, &reference, &body)
        .await?;
    Ok((
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                format!("/v2/{repository}/manifests/{digest}"),
            ),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
    )
        .into_response())
}

async fn delete_manifest(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ManifestPath {
        repository,
        reference,
    }: ManifestPath,
) -> RegistryResult<StatusCode> {
    state.auth.authorize_admin(&identity)?;
    state.store.delete_manifest(&repository, &reference).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Response body for the tag listing endpoint.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TagList {
    /// Repository name.
    pub name: String,
    /// Tags, sorted lexicographically.
    pub tags: Vec<String>,
}

async fn list_tags(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    RepoPath(repository): RepoPath,
) -> RegistryResult<Json<TagList>> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Pull)?;
    let tags = state.store.list_tags(&repository).await?;
    Ok(Json(TagList {
        name: repository.as_str().to_owned(),
        tags,
    }))
}

/// Response body for the catalog endpoint.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Catalog {
    /// Repositories with at least one manifest.
    pub repositories: Vec<String>,
}

async fn catalog(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> RegistryResult<Json<Catalog>> {
    state.auth.authorize_admin(&identity)?;
    let repositories = state.store.list_repositories().await?;
    Ok(Json(Catalog { repositories }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json() -> serde_json::Value {
        serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": Digest::of_bytes(b"config").to_string(),
                "size": 6,
            },
            "layers": [
                {
                    "mediaType": "application/vnd.oci.image.layer.v1.tar",
                    "digest": Digest::of_bytes(b"layer").to_string(),
                    "size": 5,
                }
            ],
        })
    }

    #[test]
    fn parses_and_lists_referents() {
        let body = serde_json::to_vec(&manifest_json()).unwrap();
        let document = ManifestDocument::parse(&body).unwrap();
        assert_eq!(
            document.referenced_digests(),
            vec![Digest::of_bytes(b"config"), Digest::of_bytes(b"layer")]
        );
    }

    #[test]
    fn rejects_unknown_media_type() {
        let mut value = manifest_json();
        value["mediaType"] = "application/json".into();
        let body = serde_json::to_vec(&value).unwrap();
        let error = ManifestDocument::parse(&body).unwrap_err();
        assert!(matches!(error, RegistryError::UnsupportedManifestType(_)));
    }

    #[test]
    fn rejects_malformed_body() {
        let error = ManifestDocument::parse(b"{not json").unwrap_err();
        assert!(matches!(error, RegistryError::InvalidManifest(_)));

        // A bad digest inside a descriptor is also a parse failure.
        let mut value = manifest_json();
        value["config"]["digest"] = "sha256:short".into();
        let body = serde_json::to_vec(&value).unwrap();
        let error = ManifestDocument::parse(&body).unwrap_err();
        assert!(matches!(error, RegistryError::InvalidManifest(_)));
    }
}
