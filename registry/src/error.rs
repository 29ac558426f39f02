//! Error types for the registry.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error taxonomy for registry operations.
///
/// Every variant maps to a specific HTTP status and a stable error code, so
/// callers and tests can branch on the kind rather than on message text.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest not found.
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// Tag not found.
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// Upload session not found (or expired, or owned by someone else).
    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    /// Content does not hash to the claimed digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the client claimed.
        expected: String,
        /// The digest computed over the content.
        actual: String,
    },

    /// A manifest references a blob that is not in the store.
    #[error("manifest references missing blob: {0}")]
    MissingReferent(String),

    /// No credentials, or credentials that failed verification.
    #[error("authentication required")]
    Unauthorized,

    /// Valid credentials without a grant for the requested action.
    #[error("access denied")]
    Forbidden,

    /// Chunk offset disagrees with the accumulated upload.
    #[error("range mismatch: session offset is {expected}, client sent {provided}")]
    RangeMismatch {
        /// The session's accumulated offset.
        expected: u64,
        /// The offset the client supplied.
        provided: u64,
    },

    /// A concurrent writer holds the upload session.
    #[error("upload session is busy")]
    SessionBusy,

    /// The upload session was already committed or aborted.
    #[error("upload session already closed")]
    SessionClosed,

    /// The upload exceeds the configured size limit.
    #[error("upload exceeds configured limit of {limit} bytes")]
    UploadTooLarge {
        /// The configured limit in bytes.
        limit: u64,
    },

    /// Invalid digest format.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Invalid repository name.
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Invalid tag name.
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Manifest body failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Unsupported manifest media type.
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::ManifestNotFound(_)
            | RegistryError::TagNotFound(_)
            | RegistryError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::DigestMismatch { .. }
            | RegistryError::MissingReferent(_)
            | RegistryError::InvalidDigest(_)
            | RegistryError::InvalidRepository(_)
            | RegistryError::InvalidTag(_)
            | RegistryError::InvalidManifest(_) => StatusCode::BAD_REQUEST,
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::Forbidden => StatusCode::FORBIDDEN,
            RegistryError::RangeMismatch { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::SessionBusy => StatusCode::CONFLICT,
            RegistryError::SessionClosed => StatusCode::GONE,
            RegistryError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::UnsupportedManifestType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RegistryError::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            RegistryError::Config(_) | RegistryError::Storage(_) | RegistryError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the stable error code for error responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) => "BLOB_UNKNOWN",
            RegistryError::ManifestNotFound(_) => "MANIFEST_UNKNOWN",
            RegistryError::TagNotFound(_) => "TAG_UNKNOWN",
            RegistryError::SessionNotFound(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::DigestMismatch { .. } => "DIGEST_INVALID",
            RegistryError::MissingReferent(_) => "MANIFEST_BLOB_UNKNOWN",
            RegistryError::Unauthorized => "UNAUTHORIZED",
            RegistryError::Forbidden => "DENIED",
            RegistryError::RangeMismatch { .. } => "RANGE_INVALID",
            RegistryError::SessionBusy => "BLOB_UPLOAD_BUSY",
            RegistryError::SessionClosed => "BLOB_UPLOAD_INVALID",
            RegistryError::UploadTooLarge { .. } => "SIZE_INVALID",
            RegistryError::InvalidDigest(_) => "DIGEST_INVALID",
            RegistryError::InvalidRepository(_) => "NAME_INVALID",
            RegistryError::InvalidTag(_) => "TAG_INVALID",
            RegistryError::InvalidManifest(_) => "MANIFEST_INVALID",
            RegistryError::UnsupportedManifestType(_) => "MANIFEST_INVALID",
            RegistryError::Config(_) => "UNKNOWN",
            RegistryError::Storage(e) if e.is_not_found() => "BLOB_UNKNOWN",
            RegistryError::Storage(_) | RegistryError::Io(_) => "UNKNOWN",
        }
    }
}

/// Error response body format.
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let challenge = matches!(self, RegistryError::Unauthorized);
        let message = self.to_string();

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        let mut response = (status, axum::Json(body)).into_response();
        if challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Basic realm=\"registry\""),
            );
        }
        response
    }
}
