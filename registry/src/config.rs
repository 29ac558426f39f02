//! Server configuration.

use camino::Utf8PathBuf;
use storage::StorageConfig;

use crate::error::{RegistryError, RegistryResult};

/// Top-level server configuration, deserialized from TOML.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Storage bucket holding registry data.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Storage backend.
    pub storage: StorageConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upload limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl RegistryConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> RegistryResult<Self> {
        toml_edit::de::from_str(text).map_err(|error| RegistryError::Config(error.to_string()))
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Path to the `[[credential]]` TOML file. Without one, only anonymous
    /// access is possible.
    #[serde(default)]
    pub credentials: Option<Utf8PathBuf>,

    /// Allow unauthenticated pulls.
    #[serde(default)]
    pub anonymous_pull: bool,
}

/// Upload session limits.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimitsConfig {
    /// Maximum bytes a single upload may accumulate.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Seconds an idle upload session survives before it is expired.
    #[serde(default = "default_upload_ttl_secs")]
    pub upload_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            upload_ttl_secs: default_upload_ttl_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_owned()
}

fn default_bucket() -> String {
    "registry".to_owned()
}

fn default_max_upload_bytes() -> u64 {
    // 1 GiB
    1024 * 1024 * 1024
}

fn default_upload_ttl_secs() -> u64 {
    15 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = RegistryConfig::from_toml(
            r#"
            [storage]
            kind = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:5000");
        assert_eq!(config.bucket, "registry");
        assert!(config.auth.credentials.is_none());
        assert!(!config.auth.anonymous_pull);
        assert_eq!(config.limits.max_upload_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.limits.upload_ttl_secs, 900);
    }

    #[test]
    fn full_config_parses() {
        let config = RegistryConfig::from_toml(
            r#"
            bind = "0.0.0.0:8443"
            bucket = "artifacts"

            [storage]
            kind = "local"
            path = "/var/lib/registry"

            [auth]
            credentials = "/etc/registry/credentials.toml"
            anonymous-pull = true

            [limits]
            max-upload-bytes = 1048576
            upload-ttl-secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.bind, "0.0.0.0:8443");
        assert_eq!(config.bucket, "artifacts");
        assert!(matches!(config.storage, StorageConfig::Local { .. }));
        assert!(config.auth.anonymous_pull);
        assert_eq!(config.limits.max_upload_bytes, 1048576);
        assert_eq!(config.limits.upload_ttl_secs, 60);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let error = RegistryConfig::from_toml("not valid toml [").unwrap_err();
        assert!(matches!(error, RegistryError::Config(_)));
    }
}
