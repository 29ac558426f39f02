//! Registry server binary.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr as _;
use registry::config::RegistryConfig;
use registry::{AuthGate, api};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Debug, Parser)]
#[command(name = "registry-server", about = "Minimal private artifact registry")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "REGISTRY_CONFIG", default_value = "registry.toml")]
    config: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let text = tokio::fs::read_to_string(&args.config)
        .await
        .wrap_err_with(|| format!("reading configuration from {}", args.config))?;
    let config = RegistryConfig::from_toml(&text)
        .wrap_err_with(|| format!("parsing configuration from {}", args.config))?;

    let storage = config
        .storage
        .clone()
        .build()
        .await
        .wrap_err("initializing storage backend")?;
    let auth = AuthGate::open(&config.auth)
        .await
        .wrap_err("loading credentials")?;

    let state = registry::RegistryBuilder::new(storage)
        .bucket(&config.bucket)
        .auth(auth)
        .max_upload_bytes(config.limits.max_upload_bytes)
        .upload_ttl(Duration::from_secs(config.limits.upload_ttl_secs))
        .into_state();

    // Expired uploads are reaped in the background; a sweep every minute is
    // plenty for a TTL measured in minutes.
    let sweeper = state.uploads.spawn_sweeper(Duration::from_secs(60));

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .wrap_err_with(|| format!("binding {}", config.bind))?;
    tracing::info!(bind = %config.bind, "registry listening");

    axum::serve(listener, app).await.wrap_err("serving")?;

    sweeper.abort();
    Ok(())
}
