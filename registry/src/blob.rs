//! Blob and upload endpoints.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Extension, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use crate::api::{AppState, BlobPath, RepoPath, SessionPath};
use crate::auth::{Action, Identity};
use crate::digest::{Digest, RepositoryName};
use crate::error::{RegistryError, RegistryResult};

/// Routes for blobs and chunked uploads.
///
/// Each route is registered under both repository shapes, `{name}` and
/// `{group}/{name}`.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/v2/{name}/blobs/{digest}", get(get_blob).head(head_blob).delete(delete_blob))
        .route(
            "/v2/{group}/{name}/blobs/{digest}",
            get(get_blob).head(head_blob).delete(delete_blob),
        )
        .route("/v2/{name}/blobs/uploads/", post(start_upload))
        .route("/v2/{group}/{name}/blobs/uploads/", post(start_upload))
        .route(
            "/v2/{name}/blobs/uploads/{uuid}",
            get(upload_status)
                .patch(patch_upload)
                .put(put_upload)
                .delete(cancel_upload),
        )
        .route(
            "/v2/{group}/{name}/blobs/uploads/{uuid}",
            get(upload_status)
                .patch(patch_upload)
                .put(put_upload)
                .delete(cancel_upload),
        )
}

fn digest_header(digest: &Digest) -> [(header::HeaderName, String); 1] {
    [(
        header::HeaderName::from_static("docker-content-digest"),
        digest.to_string(),
    )]
}

fn upload_location(repository: &RepositoryName, id: uuid::Uuid) -> String {
    format!("/v2/{repository}/blobs/uploads/{id}")
}

fn range_header(offset: u64) -> (header::HeaderName, String) {
    let end = offset.saturating_sub(1);
    (header::RANGE, format!("0-{end}"))
}

async fn head_blob(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    BlobPath { repository, digest }: BlobPath,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Pull)?;
    let size = state.store.blob_size(&digest).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
    )
        .into_response())
}

async fn get_blob(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    BlobPath { repository, digest }: BlobPath,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Pull)?;
    let data = state.store.get_blob(&digest).await?;
    Ok((
        StatusCode::OK,
        digest_header(&digest),
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

async fn delete_blob(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    BlobPath { digest, .. }: BlobPath,
) -> RegistryResult<StatusCode> {
    state.auth.authorize_admin(&identity)?;
    state.store.delete_blob(&digest).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn start_upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    RepoPath(repository): RepoPath,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Push)?;
    let owner = identity.username().map(str::to_owned);
    let id = state.uploads.open(repository.clone(), owner);
    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, upload_location(&repository, id)),
            (header::RANGE, "0-0".to_owned()),
            (
                header::HeaderName::from_static("docker-upload-uuid"),
                id.to_string(),
            ),
        ],
    )
        .into_response())
}

async fn upload_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    SessionPath { repository, id }: SessionPath,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Push)?;
    let offset = state.uploads.status(id, &repository, identity.username())?;
    Ok((
        StatusCode::NO_CONTENT,
        [
            (header::LOCATION, upload_location(&repository, id)),
            range_header(offset),
        ],
    )
        .into_response())
}

/// Parse the starting offset from a `Content-Range` header value.
///
/// Accepts `<start>-<end>` with an optional `bytes ` or `bytes=` prefix.
fn content_range_start(value: &str) -> Option<u64> {
    let value = value.trim();
    let value = value
        .strip_prefix("bytes ")
        .or_else(|| value.strip_prefix("bytes="))
        .unwrap_or(value);
    let (start, _end) = value.split_once('-')?;
    start.trim().parse().ok()
}

async fn patch_upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    SessionPath { repository, id }: SessionPath,
    headers: header::HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Push)?;

    let expected_offset = headers
        .get(header::CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(content_range_start);

    let offset = state
        .uploads
        .append(id, &repository, identity.username(), body, expected_offset)?;
    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, upload_location(&repository, id)),
            range_header(offset),
            (
                header::HeaderName::from_static("docker-upload-uuid"),
                id.to_string(),
            ),
        ],
    )
        .into_response())
}

#[derive(Debug, serde::Deserialize)]
struct CommitQuery {
    digest: Option<String>,
}

async fn put_upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    SessionPath { repository, id }: SessionPath,
    Query(query): Query<CommitQuery>,
    body: Bytes,
) -> RegistryResult<Response> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Push)?;

    let digest = query
        .digest
        .ok_or_else(|| RegistryError::InvalidDigest("missing digest parameter".to_owned()))?;
    let digest = Digest::parse(&digest)?;

    let owner = identity.username();
    if !body.is_empty() {
        state.uploads.append(id, &repository, owner, body, None)?;
    }
    let data = state.uploads.take_for_commit(id, &repository, owner)?;
    state.store.put_blob(&digest, &data).await?;

    Ok((
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                format!("/v2/{repository}/blobs/{digest}"),
            ),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.to_string(),
            ),
        ],
    )
        .into_response())
}

async fn cancel_upload(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    SessionPath { repository, id }: SessionPath,
) -> RegistryResult<StatusCode> {
    state
        .auth
        .authorize(&identity, repository.as_str(), Action::Push)?;
    state.uploads.abort(id, &repository, identity.username())?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_parsing() {
        assert_eq!(content_range_start("0-99"), Some(0));
        assert_eq!(content_range_start("100-199"), Some(100));
        assert_eq!(content_range_start("bytes 50-99"), Some(50));
        assert_eq!(content_range_start("bytes=50-99"), Some(50));
        assert_eq!(content_range_start("nonsense"), None);
        assert_eq!(content_range_start("-5"), None);
    }
}
