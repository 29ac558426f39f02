//! Authentication and authorization.
//!
//! Credentials live in a TOML file of `[[credential]]` tables and are held in
//! an [`ArcSwap`] so the table can be reloaded without blocking requests.
//! Passwords are stored as salted SHA-256 hashes; grants scope users to
//! repositories by exact name or prefix wildcard.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest as _, Sha256};

use crate::config::AuthConfig;
use crate::error::{RegistryError, RegistryResult};

/// An action a client may attempt against a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read blobs, manifests, and tags.
    Pull,
    /// Write blobs and manifests.
    Push,
    /// Administrative operations like catalog listing and deletion.
    Admin,
}

/// Actions that can be named in a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantAction {
    /// Read access.
    Pull,
    /// Write access.
    Push,
}

/// A repository pattern paired with permitted actions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Grant {
    /// Repository pattern: `*`, `prefix/*`, or an exact name.
    pub repository: String,
    /// Actions the grant permits.
    pub actions: Vec<GrantAction>,
}

impl Grant {
    fn matches(&self, repository: &str, action: GrantAction) -> bool {
        if !self.actions.contains(&action) {
            return false;
        }
        if self.repository == "*" {
            return true;
        }
        if let Some(prefix) = self.repository.strip_suffix("/*") {
            return repository
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        }
        self.repository == repository
    }
}

/// A single entry in the credentials file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialEntry {
    /// Login name.
    pub username: String,
    /// Per-user salt, mixed into the password hash.
    pub salt: String,
    /// Hex SHA-256 of salt followed by password.
    pub password_sha256: String,
    /// Admins bypass grant checks.
    #[serde(default)]
    pub admin: bool,
    /// Repository grants for non-admin access.
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl CredentialEntry {
    /// Create an entry with a fresh random salt.
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let password_sha256 = hash_password(&salt, password);
        Self {
            username: username.into(),
            salt,
            password_sha256,
            admin: false,
            grants: Vec::new(),
        }
    }

    /// Mark this entry as an administrator.
    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    /// Add a grant to this entry.
    pub fn grant(mut self, repository: impl Into<String>, actions: &[GrantAction]) -> Self {
        self.grants.push(Grant {
            repository: repository.into(),
            actions: actions.to_vec(),
        });
        self
    }

    fn verify(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_sha256
    }
}

/// Hash a password with its salt.
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// On-disk credentials file format.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct CredentialsFile {
    #[serde(default, rename = "credential")]
    credentials: Vec<CredentialEntry>,
}

#[derive(Debug, Default)]
struct CredentialTable {
    users: HashMap<String, CredentialEntry>,
}

impl CredentialTable {
    fn from_entries(entries: Vec<CredentialEntry>) -> Self {
        let users = entries
            .into_iter()
            .map(|entry| (entry.username.clone(), entry))
            .collect();
        Self { users }
    }
}

/// A verified caller identity.
#[derive(Debug, Clone)]
pub enum Identity {
    /// No credentials presented.
    Anonymous,
    /// A user from the credentials file.
    User(UserIdentity),
}

/// Identity details for an authenticated user.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// Login name.
    pub username: String,
    /// Whether the user is an administrator.
    pub admin: bool,
    /// Repository grants.
    pub grants: Vec<Grant>,
}

impl Identity {
    /// The username, if authenticated.
    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(&user.username),
        }
    }
}

/// Authentication and authorization gate for the registry API.
#[derive(Debug)]
pub struct AuthGate {
    table: ArcSwap<CredentialTable>,
    anonymous_pull: bool,
    credentials_path: Option<Utf8PathBuf>,
}

impl AuthGate {
    /// Build a gate from configuration, reading the credentials file if set.
    pub async fn open(config: &AuthConfig) -> RegistryResult<Self> {
        let table = match &config.credentials {
            Some(path) => read_credentials(path).await?,
            None => CredentialTable::default(),
        };
        Ok(Self {
            table: ArcSwap::from_pointee(table),
            anonymous_pull: config.anonymous_pull,
            credentials_path: config.credentials.clone(),
        })
    }

    /// Build a gate directly from entries.
    pub fn from_entries(entries: Vec<CredentialEntry>, anonymous_pull: bool) -> Self {
        Self {
            table: ArcSwap::from_pointee(CredentialTable::from_entries(entries)),
            anonymous_pull,
            credentials_path: None,
        }
    }

    /// Re-read the credentials file and swap in the new table.
    ///
    /// In-flight requests finish against the table they started with.
    pub async fn reload(&self) -> RegistryResult<()> {
        let Some(path) = &self.credentials_path else {
            return Ok(());
        };
        let table = read_credentials(path).await?;
        let count = table.users.len();
        self.table.store(Arc::new(table));
        tracing::info!(users = count, "reloaded credentials");
        Ok(())
    }

    /// Resolve an `Authorization` header value to an identity.
    ///
    /// A missing header is anonymous; a malformed header or failed
    /// verification is an error.
    pub fn authenticate(&self, header: Option<&str>) -> RegistryResult<Identity> {
        let Some(header) = header else {
            return Ok(Identity::Anonymous);
        };

        let (scheme, payload) = header
            .split_once(' ')
            .ok_or(RegistryError::Unauthorized)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(RegistryError::Unauthorized);
        }

        let decoded = BASE64
            .decode(payload.trim())
            .map_err(|_| RegistryError::Unauthorized)?;
        let decoded = String::from_utf8(decoded).map_err(|_| RegistryError::Unauthorized)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(RegistryError::Unauthorized)?;

        let table = self.table.load();
        let Some(entry) = table.users.get(username) else {
            tracing::warn!(username, "authentication failed: unknown user");
            return Err(RegistryError::Unauthorized);
        };
        if !entry.verify(password) {
            tracing::warn!(username, "authentication failed: bad password");
            return Err(RegistryError::Unauthorized);
        }

        Ok(Identity::User(UserIdentity {
            username: entry.username.clone(),
            admin: entry.admin,
            grants: entry.grants.clone(),
        }))
    }

    /// Check that an identity may perform an action against a repository.
    pub fn authorize(
        &self,
        identity: &Identity,
        repository: &str,
        action: Action,
    ) -> RegistryResult<()> {
        let user = match identity {
            Identity::Anonymous => {
                if self.anonymous_pull && action == Action::Pull {
                    return Ok(());
                }
                return Err(RegistryError::Unauthorized);
            }
            Identity::User(user) => user,
        };

        if user.admin {
            return Ok(());
        }

        let grant_action = match action {
            Action::Pull => GrantAction::Pull,
            Action::Push => GrantAction::Push,
            Action::Admin => return Err(RegistryError::Forbidden),
        };

        if user
            .grants
            .iter()
            .any(|grant| grant.matches(repository, grant_action))
        {
            Ok(())
        } else {
            tracing::warn!(
                username = user.username,
                repository,
                ?action,
                "authorization denied"
            );
            Err(RegistryError::Forbidden)
        }
    }

    /// Check that an identity holds administrative rights.
    pub fn authorize_admin(&self, identity: &Identity) -> RegistryResult<()> {
        match identity {
            Identity::Anonymous => Err(RegistryError::Unauthorized),
            Identity::User(user) if user.admin => Ok(()),
            Identity::User(_) => Err(RegistryError::Forbidden),
        }
    }
}

async fn read_credentials(path: &Utf8Path) -> RegistryResult<CredentialTable> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| RegistryError::Config(format!("reading {path}: {error}")))?;
    let file: CredentialsFile = toml_edit::de::from_str(&text)
        .map_err(|error| RegistryError::Config(format!("parsing {path}: {error}")))?;
    Ok(CredentialTable::from_entries(file.credentials))
}

/// Middleware that resolves credentials and stores the [`Identity`] as a
/// request extension for handlers to authorize against.
pub async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<crate::api::AppState>,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::response::IntoResponse as _;

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match state.auth.authenticate(header.as_deref()) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        AuthGate::from_entries(
            vec![
                CredentialEntry::new("admin", "root-pw").admin(),
                CredentialEntry::new("alice", "alice-pw")
                    .grant("library/*", &[GrantAction::Pull, GrantAction::Push]),
                CredentialEntry::new("bob", "bob-pw").grant("*", &[GrantAction::Pull]),
            ],
            false,
        )
    }

    fn basic(username: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
    }

    #[test]
    fn authenticate_parses_basic_header() {
        let gate = gate();

        let identity = gate.authenticate(Some(&basic("alice", "alice-pw"))).unwrap();
        assert_eq!(identity.username(), Some("alice"));

        // Scheme is case-insensitive.
        let lowered = basic("alice", "alice-pw").replace("Basic", "basic");
        assert!(gate.authenticate(Some(&lowered)).is_ok());

        assert!(matches!(gate.authenticate(None).unwrap(), Identity::Anonymous));
        assert!(gate.authenticate(Some("Bearer token")).is_err());
        assert!(gate.authenticate(Some("Basic ???")).is_err());
        assert!(gate.authenticate(Some(&basic("alice", "wrong"))).is_err());
        assert!(gate.authenticate(Some(&basic("nobody", "x"))).is_err());
    }

    #[test]
    fn grant_patterns() {
        let all = Grant {
            repository: "*".into(),
            actions: vec![GrantAction::Pull],
        };
        assert!(all.matches("anything/here", GrantAction::Pull));
        assert!(!all.matches("anything/here", GrantAction::Push));

        let prefixed = Grant {
            repository: "library/*".into(),
            actions: vec![GrantAction::Push],
        };
        assert!(prefixed.matches("library/app", GrantAction::Push));
        assert!(!prefixed.matches("library", GrantAction::Push));
        assert!(!prefixed.matches("librarian/app", GrantAction::Push));

        let exact = Grant {
            repository: "tool".into(),
            actions: vec![GrantAction::Pull],
        };
        assert!(exact.matches("tool", GrantAction::Pull));
        assert!(!exact.matches("tool/sub", GrantAction::Pull));
    }

    #[test]
    fn authorization_matrix() {
        let gate = gate();
        let admin = gate.authenticate(Some(&basic("admin", "root-pw"))).unwrap();
        let alice = gate.authenticate(Some(&basic("alice", "alice-pw"))).unwrap();
        let bob = gate.authenticate(Some(&basic("bob", "bob-pw"))).unwrap();

        // Admin can do anything.
        assert!(gate.authorize(&admin, "any/repo", Action::Push).is_ok());
        assert!(gate.authorize_admin(&admin).is_ok());

        // Alice is scoped to library/*.
        assert!(gate.authorize(&alice, "library/app", Action::Push).is_ok());
        assert!(matches!(
            gate.authorize(&alice, "other/app", Action::Pull),
            Err(RegistryError::Forbidden)
        ));
        assert!(matches!(
            gate.authorize_admin(&alice),
            Err(RegistryError::Forbidden)
        ));

        // Bob can pull everywhere but push nowhere.
        assert!(gate.authorize(&bob, "library/app", Action::Pull).is_ok());
        assert!(matches!(
            gate.authorize(&bob, "library/app", Action::Push),
            Err(RegistryError::Forbidden)
        ));

        // Anonymous callers get a challenge, not a denial.
        assert!(matches!(
            gate.authorize(&Identity::Anonymous, "library/app", Action::Pull),
            Err(RegistryError::Unauthorized)
        ));
    }

    #[test]
    fn anonymous_pull_mode() {
        let gate = AuthGate::from_entries(Vec::new(), true);
        assert!(gate
            .authorize(&Identity::Anonymous, "any/repo", Action::Pull)
            .is_ok());
        assert!(matches!(
            gate.authorize(&Identity::Anonymous, "any/repo", Action::Push),
            Err(RegistryError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn reload_swaps_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("credentials.toml")).unwrap();

        let write = |entries: Vec<CredentialEntry>| {
            let file = CredentialsFile {
                credentials: entries,
            };
            std::fs::write(&path, toml_edit::ser::to_string_pretty(&file).unwrap()).unwrap();
        };

        write(vec![CredentialEntry::new("alice", "first")]);
        let gate = AuthGate::open(&AuthConfig {
            credentials: Some(path.clone()),
            anonymous_pull: false,
        })
        .await
        .unwrap();
        assert!(gate.authenticate(Some(&basic("alice", "first"))).is_ok());

        write(vec![CredentialEntry::new("alice", "second")]);
        gate.reload().await.unwrap();
        assert!(gate.authenticate(Some(&basic("alice", "first"))).is_err());
        assert!(gate.authenticate(Some(&basic("alice", "second"))).is_ok());
    }
}
