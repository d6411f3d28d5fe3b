// src/transaction.rs

//! Backup-then-replace update transactions
//!
//! Applying an update to one artifact:
//! 1. Copy the live file into the backup directory, unless a backup with
//!    that filename already exists (the first backup is never overwritten)
//! 2. Materialize the release's primary file into the destination
//!    directory through the download cache
//! 3. When the destination is the artifact's own directory, remove the
//!    old file so only the new version is live, provided the backup holds
//!    its current bytes. A stale backup keeps the old file live instead.
//!
//! The backup always precedes the download, so a failed download never
//! leaves the artifact without a recovery copy. Failures are reported per
//! artifact; a batch keeps going and never rolls back earlier updates.

use crate::artifact::Artifact;
use crate::cache::{DownloadCache, DownloadProgress, Materialized};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::registry::ReleaseRecord;
use crate::resolver::ResolutionResult;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

/// What happened to the backup copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    Created(PathBuf),
    /// An earlier backup was kept as is
    AlreadyExists(PathBuf),
    /// The live file was gone, nothing to back up
    SourceMissing,
}

/// Result of applying one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    Applied {
        backup: BackupStatus,
        materialized: Materialized,
        /// Old file removed from the live directory
        replaced_old: bool,
    },
    PartialFailure {
        /// Backup state reached before the failure, if any
        backup: Option<BackupStatus>,
        reason: String,
    },
}

/// Per-artifact report for the caller to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub artifact: String,
    pub old_version: String,
    pub new_version: String,
    pub result: UpdateResult,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.result, UpdateResult::Applied { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.result {
            UpdateResult::PartialFailure { reason, .. } => Some(reason),
            UpdateResult::Applied { .. } => None,
        }
    }
}

/// An artifact chosen for update together with its replacement release
#[derive(Debug, Clone)]
pub struct Selection {
    pub artifact: Artifact,
    pub release: ReleaseRecord,
    /// Version label shown as "old"
    pub old_version: String,
}

/// Build the update set from resolution results
///
/// Keeps artifacts whose result offers a distinct update, optionally only
/// those named in `only`. Each artifact appears at most once.
pub fn select_updates(
    artifacts: &[Artifact],
    results: &[ResolutionResult],
    only: Option<&[String]>,
) -> Vec<Selection> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|r| r.has_update())
        .filter(|r| only.is_none_or(|names| names.iter().any(|n| n == &r.artifact)))
        .filter(|r| seen.insert(r.artifact.clone()))
        .filter_map(|r| {
            let artifact = artifacts.iter().find(|a| a.name == r.artifact)?;
            Some(Selection {
                artifact: artifact.clone(),
                release: r.candidate.clone()?,
                old_version: r.current_version_label().to_string(),
            })
        })
        .collect()
}

/// Applies updates into a destination directory
pub struct UpdateTransaction {
    cache: DownloadCache,
    destination_dir: PathBuf,
    backup_dir: PathBuf,
}

impl UpdateTransaction {
    pub fn new(
        cache: DownloadCache,
        destination_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            destination_dir: destination_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Back up `artifact` and materialize `release` in its place
    pub fn apply(&self, artifact: &Artifact, release: &ReleaseRecord) -> UpdateOutcome {
        self.apply_with_progress(artifact, release, &mut |_: &DownloadProgress| {})
    }

    pub fn apply_with_progress(
        &self,
        artifact: &Artifact,
        release: &ReleaseRecord,
        progress: &mut dyn FnMut(&DownloadProgress),
    ) -> UpdateOutcome {
        info!(
            "Updating {} ({}) to version {}",
            artifact.name, artifact.filename, release.version
        );

        let result = self.run(artifact, release, progress);
        if let UpdateResult::PartialFailure { reason, .. } = &result {
            error!("Failed to update {}: {}", artifact.name, reason);
        }

        UpdateOutcome {
            artifact: artifact.name.clone(),
            old_version: artifact.version_label().to_string(),
            new_version: release.version.clone(),
            result,
        }
    }

    fn run(
        &self,
        artifact: &Artifact,
        release: &ReleaseRecord,
        progress: &mut dyn FnMut(&DownloadProgress),
    ) -> UpdateResult {
        let backup = match backup_artifact(artifact, &self.backup_dir) {
            Ok(status) => status,
            Err(e) => {
                return UpdateResult::PartialFailure {
                    backup: None,
                    reason: format!("backup failed: {}", e),
                };
            }
        };

        let Some(entry) = release.primary_file() else {
            return UpdateResult::PartialFailure {
                backup: Some(backup),
                reason: format!("release {} has no files", release.id),
            };
        };

        let in_place = artifact
            .directory()
            .is_some_and(|dir| same_dir(dir, &self.destination_dir));
        let preserved = backup_preserves_live(artifact, &backup);

        // Same filename in place: materializing would overwrite the only copy
        if in_place && !preserved && entry.filename == artifact.filename {
            return UpdateResult::PartialFailure {
                backup: Some(backup),
                reason: format!(
                    "existing backup of {} differs from the live file, move it aside first",
                    artifact.filename
                ),
            };
        }

        let materialized = match self
            .cache
            .materialize_with_progress(&self.destination_dir, entry, progress)
        {
            Ok(m) => m,
            Err(e) => {
                return UpdateResult::PartialFailure {
                    backup: Some(backup),
                    reason: e.to_string(),
                };
            }
        };

        let swap = in_place
            && entry.filename != artifact.filename
            && backup != BackupStatus::SourceMissing;
        let replaced_old = if !swap {
            false
        } else if preserved {
            remove_old(artifact)
        } else {
            warn!(
                "Keeping {} live: existing backup holds different bytes",
                artifact.path.display()
            );
            false
        };

        UpdateResult::Applied {
            backup,
            materialized,
            replaced_old,
        }
    }

    /// Apply a batch in order, one artifact at a time
    ///
    /// A repeated artifact is applied once; later duplicates are dropped.
    pub fn apply_all(&self, selections: &[Selection]) -> Vec<UpdateOutcome> {
        let mut seen = HashSet::new();
        selections
            .iter()
            .filter(|s| {
                let first = seen.insert(s.artifact.name.clone());
                if !first {
                    warn!("Skipping duplicate selection of {}", s.artifact.name);
                }
                first
            })
            .map(|s| {
                let mut outcome = self.apply(&s.artifact, &s.release);
                outcome.old_version = s.old_version.clone();
                outcome
            })
            .collect()
    }

    /// Copy artifacts that were not updated into the destination
    ///
    /// Used when moving a set to a new directory without changing target
    /// environment. Existing destination files are left alone. Returns the
    /// number of files copied.
    pub fn carry_over(&self, artifacts: &[Artifact], outcomes: &[UpdateOutcome]) -> usize {
        let updated: HashSet<&str> = outcomes
            .iter()
            .filter(|o| o.is_applied())
            .map(|o| o.artifact.as_str())
            .collect();

        let mut copied = 0;
        for artifact in artifacts.iter().filter(|a| !updated.contains(a.name.as_str())) {
            if artifact
                .directory()
                .is_some_and(|dir| same_dir(dir, &self.destination_dir))
            {
                continue;
            }
            let dest = self.destination_dir.join(&artifact.filename);
            if dest.exists() {
                continue;
            }
            let copy = fs::create_dir_all(&self.destination_dir)
                .and_then(|_| fs::copy(&artifact.path, &dest));
            match copy {
                Ok(_) => {
                    info!("Copied {} to {}", artifact.filename, self.destination_dir.display());
                    copied += 1;
                }
                Err(e) => error!(
                    "Failed to copy {} to {}: {}",
                    artifact.path.display(),
                    dest.display(),
                    e
                ),
            }
        }
        copied
    }
}

/// Copy the live file into `backup_dir`, never replacing an existing backup
pub fn backup_artifact(artifact: &Artifact, backup_dir: &Path) -> Result<BackupStatus> {
    if !artifact.path.is_file() {
        warn!(
            "Mod file {} does not exist, nothing to back up",
            artifact.path.display()
        );
        return Ok(BackupStatus::SourceMissing);
    }

    let backup_path = backup_dir.join(&artifact.filename);
    if backup_path.exists() {
        warn!(
            "Backup file {} already exists, skipping backup",
            backup_path.display()
        );
        return Ok(BackupStatus::AlreadyExists(backup_path));
    }

    fs::create_dir_all(backup_dir).map_err(|e| {
        Error::IoError(format!("Failed to create directory {}: {}", backup_dir.display(), e))
    })?;

    // Stage next to the backup so the final link is atomic and no-clobber
    let mut staged = NamedTempFile::new_in(backup_dir)?;
    let mut source = File::open(&artifact.path).map_err(|e| {
        Error::IoError(format!("Failed to open {}: {}", artifact.path.display(), e))
    })?;
    io::copy(&mut source, staged.as_file_mut())?;

    match staged.persist_noclobber(&backup_path) {
        Ok(_) => {
            info!("Backed up {} to {}", artifact.filename, backup_path.display());
            Ok(BackupStatus::Created(backup_path))
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            warn!(
                "Backup file {} appeared concurrently, keeping it",
                backup_path.display()
            );
            Ok(BackupStatus::AlreadyExists(backup_path))
        }
        Err(e) => Err(Error::IoError(format!(
            "Failed to write backup {}: {}",
            backup_path.display(),
            e.error
        ))),
    }
}

/// Whether the live bytes of `artifact` survive in the backup directory
fn backup_preserves_live(artifact: &Artifact, backup: &BackupStatus) -> bool {
    match backup {
        BackupStatus::Created(_) | BackupStatus::SourceMissing => true,
        BackupStatus::AlreadyExists(path) => {
            match (fingerprint(path), fingerprint(&artifact.path)) {
                (Ok(saved), Ok(live)) => saved == live,
                _ => false,
            }
        }
    }
}

fn remove_old(artifact: &Artifact) -> bool {
    match fs::remove_file(&artifact.path) {
        Ok(()) => {
            info!("Removed old file {}", artifact.path.display());
            true
        }
        Err(e) => {
            warn!("Failed to remove old file {}: {}", artifact.path.display(), e);
            false
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
