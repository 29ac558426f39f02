//! A minimal private artifact registry.
//!
//! Artifacts are content-addressed blobs plus JSON manifests that tie blobs
//! together under human-readable tags, served over an HTTP API modeled on
//! the container registry protocol. Storage is pluggable through the
//! `storage` crate, access is gated by HTTP basic authentication with
//! per-repository grants, and Prometheus metrics are exported from
//! `/metrics`.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use registry::RegistryBuilder;
//! use storage::StorageConfig;
//!
//! let storage = StorageConfig::Memory.build().await?;
//! let app = RegistryBuilder::new(storage).bucket("artifacts").build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod digest;
pub mod error;
pub mod metrics;
pub mod store;
pub mod upload;

mod blob;
mod manifest;

pub use self::api::{AppState, RegistryBuilder};
pub use self::auth::{Action, AuthGate, CredentialEntry, Grant, GrantAction, Identity};
pub use self::config::RegistryConfig;
pub use self::digest::{Digest, Reference, RepositoryName};
pub use self::error::{RegistryError, RegistryResult};
pub use self::store::RegistryStore;
pub use self::upload::UploadSessions;
