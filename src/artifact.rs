// src/artifact.rs

//! Local artifacts under management
//!
//! An artifact is a versioned jar in the live directory. Its stable name
//! comes from an [`ArtifactMetadata`] provider; its content hash is
//! computed on first use and cached for the rest of the run.

use crate::error::{Error, Result};
use crate::fingerprint::{self, ContentHash};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// File extension of managed artifacts
pub const ARTIFACT_EXTENSION: &str = "jar";

/// A locally managed versioned file
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Stable identity key, independent of the filename
    pub name: String,
    pub filename: String,
    pub path: PathBuf,
    /// Version label declared by the file itself
    pub version: Option<String>,
    /// Series identifier known locally, used when hash lookup finds nothing
    pub series_hint: Option<String>,
    hash: OnceLock<ContentHash>,
}

impl Artifact {
    /// Create an artifact for the file at `path`
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            name: name.into(),
            filename,
            path,
            version: None,
            series_hint: None,
            hash: OnceLock::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_series_hint(mut self, series: impl Into<String>) -> Self {
        self.series_hint = Some(series.into());
        self
    }

    /// Content hash of the file, computed once per process run
    pub fn content_hash(&self) -> Result<&ContentHash> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }
        let hash = fingerprint::fingerprint(&self.path)?;
        Ok(self.hash.get_or_init(|| hash))
    }

    /// Locally declared version, or "unknown"
    pub fn version_label(&self) -> &str {
        self.version.as_deref().unwrap_or("unknown")
    }

    /// Directory holding the live file
    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }
}

/// Metadata the presentation layer extracts from an artifact file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMetadata {
    pub name: String,
    pub version: Option<String>,
    pub series_hint: Option<String>,
}

/// Source of an artifact's stable name and declared version
///
/// Returning `Ok(None)` means the file is not a managed artifact.
pub trait ArtifactMetadata {
    fn describe(&self, path: &Path) -> Result<Option<LocalMetadata>>;
}

/// Derives name and version from the filename alone
///
/// `sodium-fabric-0.5.8+mc1.20.1.jar` yields name `sodium-fabric` and
/// version `0.5.8+mc1.20.1`: the split happens at the first `-` followed
/// by a digit.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameMetadata;

impl ArtifactMetadata for FilenameMetadata {
    fn describe(&self, path: &Path) -> Result<Option<LocalMetadata>> {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };

        let split = stem
            .char_indices()
            .find(|&(i, c)| {
                c == '-'
                    && i > 0
                    && stem[i + 1..]
                        .chars()
                        .next()
                        .is_some_and(|next| next.is_ascii_digit())
            })
            .map(|(i, _)| i);

        let (name, version) = match split {
            Some(i) => (&stem[..i], Some(stem[i + 1..].to_string())),
            None => (stem, None),
        };

        Ok(Some(LocalMetadata {
            name: name.to_string(),
            version,
            series_hint: None,
        }))
    }
}

/// Enumerate managed artifacts in a directory
///
/// Only `.jar` files are considered. Files whose metadata cannot be read
/// are logged and skipped; a duplicate name keeps the first file (by
/// filename order).
pub fn scan_directory(dir: &Path, metadata: &dyn ArtifactMetadata) -> Result<Vec<Artifact>> {
    if !dir.is_dir() {
        return Err(Error::NotFoundError(format!(
            "Mod folder '{}' does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| {
        Error::IoError(format!("Failed to read directory {}: {}", dir.display(), e))
    })? {
        let path = entry?.path();
        let is_jar = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ARTIFACT_EXTENSION));
        if is_jar && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seen = HashSet::new();
    let mut artifacts = Vec::with_capacity(paths.len());
    for path in paths {
        let meta = match metadata.describe(&path) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                debug!("Skipping unmanaged file {}", path.display());
                continue;
            }
            Err(e) => {
                warn!("Error reading {}: {}", path.display(), e);
                continue;
            }
        };

        if !seen.insert(meta.name.clone()) {
            warn!(
                "Duplicate artifact name '{}' at {}, keeping first",
                meta.name,
                path.display()
            );
            continue;
        }

        let mut artifact = Artifact::new(meta.name, path);
        artifact.version = meta.version;
        artifact.series_hint = meta.series_hint;
        artifacts.push(artifact);
    }

    info!("Found {} artifacts in {}", artifacts.len(), dir.display());
    Ok(artifacts)
}
