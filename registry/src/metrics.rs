//! Prometheus metrics.
//!
//! Metrics are process-wide statics registered once against the default
//! registry, and exported in text format from the `/metrics` endpoint.

use std::sync::{LazyLock, Once};
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{
    Encoder as _, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    histogram_opts, opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};

/// HTTP requests served, labelled by route template and status code.
pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!(
            "registry_http_requests_total",
            "HTTP requests served by the registry"
        ),
        &["endpoint", "status"]
    )
    .expect("metric registration")
});

/// HTTP request latency, labelled by route template.
pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "registry_http_request_duration_seconds",
            "HTTP request latency in seconds"
        ),
        &["endpoint"]
    )
    .expect("metric registration")
});

/// Blobs written to storage.
pub static BLOBS_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(opts!(
        "registry_blobs_stored_total",
        "Blobs written to storage"
    ))
    .expect("metric registration")
});

/// Bytes of blob data written to storage.
pub static BLOB_BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(opts!(
        "registry_blob_bytes_stored_total",
        "Bytes of blob data written to storage"
    ))
    .expect("metric registration")
});

/// Upload sessions opened.
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(opts!(
        "registry_upload_sessions_created_total",
        "Upload sessions opened"
    ))
    .expect("metric registration")
});

/// Upload sessions committed to a blob.
pub static UPLOAD_SESSIONS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(opts!(
        "registry_upload_sessions_committed_total",
        "Upload sessions committed to a blob"
    ))
    .expect("metric registration")
});

/// Upload sessions cancelled by the client.
pub static UPLOAD_SESSIONS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(opts!(
        "registry_upload_sessions_aborted_total",
        "Upload sessions cancelled by the client"
    ))
    .expect("metric registration")
});

/// Upload sessions dropped after their idle timeout.
pub static UPLOAD_SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(opts!(
        "registry_upload_sessions_expired_total",
        "Upload sessions dropped after their idle timeout"
    ))
    .expect("metric registration")
});

/// Upload sessions currently open.
pub static UPLOAD_SESSIONS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(opts!(
        "registry_upload_sessions_active",
        "Upload sessions currently open"
    ))
    .expect("metric registration")
});

/// Force registration of every metric so they appear in exports before
/// first use.
pub fn register_metrics() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        LazyLock::force(&HTTP_REQUESTS);
        LazyLock::force(&HTTP_REQUEST_DURATION);
        LazyLock::force(&BLOBS_STORED);
        LazyLock::force(&BLOB_BYTES_STORED);
        LazyLock::force(&UPLOAD_SESSIONS_CREATED);
        LazyLock::force(&UPLOAD_SESSIONS_COMMITTED);
        LazyLock::force(&UPLOAD_SESSIONS_ABORTED);
        LazyLock::force(&UPLOAD_SESSIONS_EXPIRED);
        LazyLock::force(&UPLOAD_SESSIONS_ACTIVE);
    });
}

/// Handler for the `/metrics` endpoint.
pub async fn metrics_handler() -> Response {
    use axum::response::IntoResponse as _;

    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&families, &mut buffer) {
        tracing::error!(%error, "failed to encode metrics");
        return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        buffer,
    )
        .into_response()
}

/// Middleware recording a counter and latency histogram per request.
///
/// The endpoint label is the matched route template so that parameterized
/// paths do not explode label cardinality.
pub async fn record_metrics(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS.with_label_values(&[&endpoint, &status]).inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&endpoint])
        .observe(elapsed);

    response
}
