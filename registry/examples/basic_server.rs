//! Serve a registry out of memory with a single admin user.
//!
//! Push and pull with any OCI-compatible client:
//!
//! ```sh
//! cargo run --example basic_server --features cli
//! curl -u admin:admin http://127.0.0.1:5000/v2/
//! ```

use registry::{AuthGate, CredentialEntry, RegistryBuilder};
use storage::StorageConfig;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("debug"))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage = StorageConfig::Memory.build().await?;
    let auth = AuthGate::from_entries(vec![CredentialEntry::new("admin", "admin").admin()], true);

    let app = RegistryBuilder::new(storage)
        .bucket("artifacts")
        .auth(auth)
        .build();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
    tracing::info!("listening on http://127.0.0.1:5000");
    axum::serve(listener, app).await?;
    Ok(())
}
