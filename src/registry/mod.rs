// src/registry/mod.rs

//! Remote registry contract
//!
//! This module defines what the resolver needs from a registry:
//! - Identify the release a local file belongs to, by content hash
//! - List the releases of a series that carry a compatibility tag
//!
//! Gateways never retry and have no side effects. Failures carry an
//! explicit reason so callers can tell a terminal "not found" from a
//! retryable transient error.

pub mod memory;
pub mod modrinth;

use crate::fingerprint::{ContentHash, HashAlgorithm};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::InMemoryRegistry;
pub use modrinth::ModrinthClient;

/// A downloadable file belonging to a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub url: String,
    /// Expected SHA-512 of the file, hex encoded
    pub sha512: Option<String>,
    pub size: Option<u64>,
    /// Whether the registry marks this as the release's main file
    pub primary: bool,
}

impl FileEntry {
    pub fn new(
        filename: impl Into<String>,
        url: impl Into<String>,
        sha512: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
            sha512: Some(sha512.into()),
            size: None,
            primary: true,
        }
    }

    /// Digest the file must match before it is trusted
    pub fn expected_hash(&self) -> Option<ContentHash> {
        self.sha512
            .as_deref()
            .map(|hex| ContentHash::new(HashAlgorithm::Sha512, hex))
    }
}

/// A remote release descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub id: String,
    /// Series (project) the release belongs to
    pub series_id: String,
    pub version: String,
    /// Compatibility tags, e.g. loader kinds
    pub compatibility_tags: Vec<String>,
    /// Target-environment tags, e.g. supported game versions
    pub environment_tags: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub files: Vec<FileEntry>,
}

impl ReleaseRecord {
    pub fn new(
        id: impl Into<String>,
        series_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            series_id: series_id.into(),
            version: version.into(),
            compatibility_tags: Vec::new(),
            environment_tags: Vec::new(),
            published: None,
            files: Vec::new(),
        }
    }

    /// The file marked primary, falling back to the first listed file
    pub fn primary_file(&self) -> Option<&FileEntry> {
        self.files
            .iter()
            .find(|f| f.primary)
            .or_else(|| self.files.first())
    }

    pub fn supports_environment(&self, tag: &str) -> bool {
        self.environment_tags.iter().any(|t| t == tag)
    }

    pub fn has_compatibility(&self, tag: &str) -> bool {
        self.compatibility_tags.iter().any(|t| t == tag)
    }
}

/// Why a registry call failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Identity or series is absent from the registry; never retried
    #[error("Not found in registry: {0}")]
    NotFound(String),

    /// Any other failure (network, server error, bad payload); retryable
    #[error("Registry request failed: {0}")]
    Transient(String),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Operations the resolver requires from a registry
pub trait RegistryGateway: Send + Sync {
    /// Identify the release a local file corresponds to
    fn lookup_by_hash(&self, hash: &ContentHash) -> RegistryResult<ReleaseRecord>;

    /// All releases of a series carrying `compatibility_tag`, in registry order
    fn list_compatible_releases(
        &self,
        series_id: &str,
        compatibility_tag: &str,
    ) -> RegistryResult<Vec<ReleaseRecord>>;
}
