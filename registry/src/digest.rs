//! Content digests, repository names, and manifest references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::RegistryError;

/// An algorithm-tagged content digest, e.g. `sha256:<hex>`.
///
/// Only SHA-256 is supported; the hex component is normalized to lowercase.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// The digest algorithm tag.
    pub const ALGORITHM: &'static str = "sha256";

    /// Parse a digest from its `sha256:<hex>` form.
    pub fn parse(value: &str) -> Result<Self, RegistryError> {
        let (algorithm, hex) = value
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidDigest(value.to_string()))?;

        if algorithm != Self::ALGORITHM {
            return Err(RegistryError::InvalidDigest(value.to_string()));
        }

        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RegistryError::InvalidDigest(value.to_string()));
        }

        Ok(Self {
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Compute the digest of a byte sequence.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// The hex component, without the algorithm tag.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Self::ALGORITHM, self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}

/// A validated repository name: one or two slash-separated segments of
/// lowercase alphanumerics, dots, dashes and underscores.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryName(String);

impl RepositoryName {
    /// Parse and validate a repository name.
    pub fn parse(value: &str) -> Result<Self, RegistryError> {
        let segments: Vec<&str> = value.split('/').collect();
        if segments.is_empty() || segments.len() > 2 {
            return Err(RegistryError::InvalidRepository(value.to_string()));
        }

        for segment in &segments {
            if !valid_name_segment(segment) {
                return Err(RegistryError::InvalidRepository(value.to_string()));
            }
        }

        Ok(Self(value.to_string()))
    }

    /// Join a group and name segment into a repository name.
    pub fn from_segments(group: &str, name: &str) -> Result<Self, RegistryError> {
        Self::parse(&format!("{group}/{name}"))
    }

    /// The repository name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_name_segment(segment: &str) -> bool {
    if segment.is_empty() || segment.len() > 128 {
        return false;
    }

    let bytes = segment.as_bytes();
    let interior_ok = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_'));
    // Leading or trailing punctuation (including "..") makes path handling
    // ambiguous, so names start and end with an alphanumeric.
    interior_ok
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepositoryName({})", self.0)
    }
}

impl FromStr for RepositoryName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepositoryName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RepositoryName> for String {
    fn from(value: RepositoryName) -> Self {
        value.0
    }
}

/// A manifest reference: either a mutable tag or an immutable digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    /// A mutable tag name.
    Tag(String),
    /// An immutable content digest.
    Digest(Digest),
}

impl Reference {
    /// Parse a reference. Anything containing `:` is treated as a digest.
    pub fn parse(value: &str) -> Result<Self, RegistryError> {
        if value.contains(':') {
            return Ok(Self::Digest(Digest::parse(value)?));
        }

        if !valid_tag(value) {
            return Err(RegistryError::InvalidTag(value.to_string()));
        }

        Ok(Self::Tag(value.to_string()))
    }

    /// Returns the digest when this reference is one.
    pub fn as_digest(&self) -> Option<&Digest> {
        match self {
            Self::Digest(digest) => Some(digest),
            Self::Tag(_) => None,
        }
    }
}

fn valid_tag(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
        && value.as_bytes()[0].is_ascii_alphanumeric()
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "{tag}"),
            Self::Digest(digest) => write!(f, "{digest}"),
        }
    }
}
