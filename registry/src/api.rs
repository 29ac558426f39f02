//! HTTP API surface.
//!
//! The router composes the blob and manifest endpoints behind the
//! authentication middleware, with the version probe and metrics endpoint
//! left open. Repository names may contain one path separator, so every
//! repository-scoped route is registered in a one-segment and a two-segment
//! shape and the extractors normalize the two.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{FromRequestParts, Path};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{self, AuthGate};
use crate::digest::{Digest, Reference, RepositoryName};
use crate::error::{RegistryError, RegistryResult};
use crate::metrics;
use crate::store::RegistryStore;
use crate::upload::UploadSessions;
use crate::{blob, manifest};

/// Shared state for every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Blob and manifest storage.
    pub store: RegistryStore,
    /// Authentication gate.
    pub auth: Arc<AuthGate>,
    /// In-flight chunked uploads.
    pub uploads: Arc<UploadSessions>,
}

/// Builder for the registry service.
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: storage::Storage,
    bucket: String,
    auth: AuthGate,
    max_upload_bytes: u64,
    upload_ttl: Duration,
}

impl RegistryBuilder {
    /// Start a builder over a storage backend.
    pub fn new(storage: storage::Storage) -> Self {
        Self {
            storage,
            bucket: "registry".to_owned(),
            auth: AuthGate::from_entries(Vec::new(), true),
            max_upload_bytes: 1024 * 1024 * 1024,
            upload_ttl: Duration::from_secs(15 * 60),
        }
    }

    /// Set the storage bucket.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Set the authentication gate.
    pub fn auth(mut self, auth: AuthGate) -> Self {
        self.auth = auth;
        self
    }

    /// Set the per-upload size cap.
    pub fn max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Set the idle timeout for upload sessions.
    pub fn upload_ttl(mut self, ttl: Duration) -> Self {
        self.upload_ttl = ttl;
        self
    }

    /// Finish the builder, returning the shared state.
    pub fn into_state(self) -> AppState {
        AppState {
            store: RegistryStore::new(self.storage, self.bucket),
            auth: Arc::new(self.auth),
            uploads: Arc::new(UploadSessions::new(self.upload_ttl, self.max_upload_bytes)),
        }
    }

    /// Finish the builder, returning the assembled router.
    pub fn build(self) -> Router {
        router(self.into_state())
    }
}

/// Assemble the full API router.
pub fn router(state: AppState) -> Router {
    metrics::register_metrics();

    let authenticated = Router::new()
        .merge(blob::router())
        .merge(manifest::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/v2/", get(api_version_check))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(authenticated)
        .layer(axum::middleware::from_fn(metrics::record_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Probe endpoint confirming the API version.
async fn api_version_check() -> StatusCode {
    StatusCode::OK
}

fn repo_from(params: &HashMap<String, String>) -> RegistryResult<RepositoryName> {
    let name = params
        .get("name")
        .ok_or_else(|| RegistryError::InvalidRepository("missing name".to_owned()))?;
    match params.get("group") {
        Some(group) => RepositoryName::from_segments(group, name),
        None => name.parse(),
    }
}

/// Extracts the repository name from either route shape.
#[derive(Debug)]
pub(crate) struct RepoPath(pub RepositoryName);

impl FromRequestParts<AppState> for RepoPath {
    type Rejection = RegistryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(params): Path<HashMap<String, String>> =
            Path::from_request_parts(parts, state)
                .await
                .map_err(|error| RegistryError::InvalidRepository(error.to_string()))?;
        Ok(RepoPath(repo_from(&params)?))
    }
}

/// Extracts a repository name and blob digest.
#[derive(Debug)]
pub(crate) struct BlobPath {
    pub repository: RepositoryName,
    pub digest: Digest,
}

impl FromRequestParts<AppState> for BlobPath {
    type Rejection = RegistryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(params): Path<HashMap<String, String>> =
            Path::from_request_parts(parts, state)
                .await
                .map_err(|error| RegistryError::InvalidDigest(error.to_string()))?;
        let repository = repo_from(&params)?;
        let digest = params
            .get("digest")
            .ok_or_else(|| RegistryError::InvalidDigest("missing digest".to_owned()))?;
        Ok(BlobPath {
            repository,
            digest: Digest::parse(digest)?,
        })
    }
}

/// Extracts a repository name and manifest reference.
#[derive(Debug)]
pub(crate) struct ManifestPath {
    pub repository: RepositoryName,
    pub reference: Reference,
}

impl FromRequestParts<AppState> for ManifestPath {
    type Rejection = RegistryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(params): Path<HashMap<String, String>> =
            Path::from_request_parts(parts, state)
                .await
                .map_err(|error| RegistryError::InvalidTag(error.to_string()))?;
        let repository = repo_from(&params)?;
        let reference = params
            .get("reference")
            .ok_or_else(|| RegistryError::InvalidTag("missing reference".to_owned()))?;
        Ok(ManifestPath {
            repository,
            reference: Reference::parse(reference)?,
        })
    }
}

/// Extracts a repository name and upload session id.
#[derive(Debug)]
pub(crate) struct SessionPath {
    pub repository: RepositoryName,
    pub id: Uuid,
}

impl FromRequestParts<AppState> for SessionPath {
    type Rejection = RegistryError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(params): Path<HashMap<String, String>> =
            Path::from_request_parts(parts, state)
                .await
                .map_err(|error| RegistryError::SessionNotFound(error.to_string()))?;
        let repository = repo_from(&params)?;
        let id = params
            .get("uuid")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| RegistryError::SessionNotFound("invalid session id".to_owned()))?;
        Ok(SessionPath { repository, id })
    }
}
