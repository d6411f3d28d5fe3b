// src/cache/mod.rs

//! Content-addressed download staging
//!
//! Files are fetched into a cache directory and only promoted into a live
//! directory once their digest matches the registry's. Policy, in order:
//! 1. The target already holds a verified copy: nothing to do
//! 2. The cache holds a verified copy: move it into the target
//! 3. Otherwise download into the cache, verify, then move
//!
//! A download that fails verification is left in the cache and reported;
//! it never reaches the target directory.

mod fetch;

pub use fetch::{DownloadProgress, Fetcher, HttpFetcher};

use crate::error::{Error, Result};
use crate::fingerprint;
use crate::registry::FileEntry;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// How a file ended up in the target directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// A verified copy was already in place
    AlreadyPresent,
    /// A verified cached copy was moved in
    FromCache,
    /// Freshly downloaded and verified
    Downloaded { bytes: u64 },
}

/// Download cache rooted at one directory
pub struct DownloadCache {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl DownloadCache {
    pub fn new(cache_dir: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetcher,
        }
    }

    /// Place a verified copy of `entry` in `target_dir`
    pub fn materialize(&self, target_dir: &Path, entry: &FileEntry) -> Result<Materialized> {
        self.materialize_with_progress(target_dir, entry, &mut |_: &DownloadProgress| {})
    }

    /// Like [`materialize`](Self::materialize), reporting download progress
    pub fn materialize_with_progress(
        &self,
        target_dir: &Path,
        entry: &FileEntry,
        progress: &mut dyn FnMut(&DownloadProgress),
    ) -> Result<Materialized> {
        check_filename(&entry.filename)?;
        let expected = entry.expected_hash().ok_or_else(|| Error::ChecksumMismatch {
            expected: "sha512 digest (none published)".to_string(),
            actual: format!("unverifiable file {}", entry.filename),
        })?;

        create_dir(target_dir)?;
        create_dir(&self.cache_dir)?;

        let target_path = target_dir.join(&entry.filename);
        let cache_path = self.cache_dir.join(&entry.filename);

        if target_path.exists() {
            if fingerprint::verify_file(&target_path, &expected)? {
                info!(
                    "File {} already exists in {}, skipping download",
                    entry.filename,
                    target_dir.display()
                );
                return Ok(Materialized::AlreadyPresent);
            }
            info!("Replacing {} due to hash mismatch", target_path.display());
        }

        if cache_path.exists() {
            if fingerprint::verify_file(&cache_path, &expected)? {
                info!(
                    "File {} already exists in cache, moving to {}",
                    entry.filename,
                    target_dir.display()
                );
                move_file(&cache_path, &target_path)?;
                return Ok(Materialized::FromCache);
            }
            info!("Redownloading {} due to hash mismatch in cache", entry.filename);
        }

        let bytes = self.download(entry, &cache_path, progress)?;

        let actual = fingerprint::fingerprint_with(&cache_path, expected.algorithm())?;
        if !actual.matches(expected.as_hex()) {
            warn!("Hash mismatch for {}: {} != {}", entry.filename, actual, expected);
            return Err(Error::ChecksumMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        move_file(&cache_path, &target_path)?;
        info!("Moved {} to {}", entry.filename, target_dir.display());
        Ok(Materialized::Downloaded { bytes })
    }

    /// Stream `entry` into `cache_path` via a temporary file in the cache
    fn download(
        &self,
        entry: &FileEntry,
        cache_path: &Path,
        progress: &mut dyn FnMut(&DownloadProgress),
    ) -> Result<u64> {
        info!(
            "Downloading {} from {} to {}",
            entry.filename,
            entry.url,
            self.cache_dir.display()
        );

        let mut temp = NamedTempFile::new_in(&self.cache_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create temporary file in {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;

        let bytes = {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let mut report = |downloaded: u64, total: Option<u64>| {
                progress(&DownloadProgress {
                    filename: entry.filename.clone(),
                    downloaded,
                    total: total.or(entry.size),
                })
            };
            let bytes = self.fetcher.fetch(&entry.url, &mut writer, &mut report)?;
            writer
                .flush()
                .map_err(|e| Error::IoError(format!("Failed to write downloaded data: {}", e)))?;
            bytes
        };

        temp.persist(cache_path).map_err(|e| {
            Error::IoError(format!(
                "Failed to move download to {}: {}",
                cache_path.display(),
                e
            ))
        })?;

        debug!("Downloaded {} bytes to {}", bytes, cache_path.display());
        Ok(bytes)
    }

    /// Whether a verified copy of `entry` is sitting in the cache
    pub fn is_cached(&self, entry: &FileEntry) -> Result<bool> {
        let Some(expected) = entry.expected_hash() else {
            return Ok(false);
        };
        fingerprint::verify_file(&self.cache_dir.join(&entry.filename), &expected)
    }
}

/// Registry-supplied filenames must name a single path component
fn check_filename(filename: &str) -> Result<()> {
    let path = Path::new(filename);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::ParseError(format!("Unsafe file name: {:?}", filename))),
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::IoError(format!("Failed to create directory {}: {}", dir.display(), e)))
}

/// Move a file, falling back to copy and delete across filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    fs::copy(from, to).map_err(|e| {
        Error::IoError(format!(
            "Failed to move {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })?;
    fs::remove_file(from).map_err(|e| {
        Error::IoError(format!("Failed to remove {}: {}", from.display(), e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct StaticFetcher {
        body: Vec<u8>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn new(body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_vec(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Fetcher for StaticFetcher {
        fn fetch(
            &self,
            _url: &str,
            sink: &mut dyn Write,
            progress: &mut dyn FnMut(u64, Option<u64>),
        ) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let total = self.body.len() as u64;
            for (i, chunk) in self.body.chunks(4).enumerate() {
                sink.write_all(chunk)?;
                progress(((i * 4) + chunk.len()) as u64, Some(total));
            }
            Ok(total)
        }
    }

    struct FailingFetcher;

    impl Fetcher for FailingFetcher {
        fn fetch(
            &self,
            url: &str,
            sink: &mut dyn Write,
            _progress: &mut dyn FnMut(u64, Option<u64>),
        ) -> Result<u64> {
            sink.write_all(b"partial")?;
            Err(Error::DownloadError(format!("connection reset fetching {}", url)))
        }
    }

    fn entry(body: &[u8]) -> FileEntry {
        FileEntry::new(
            "mod-2.0.jar",
            "https://cdn.example/mod-2.0.jar",
            fingerprint::fingerprint_bytes(body).as_hex(),
        )
    }

    fn target_files_verify(target: &Path, entry: &FileEntry) -> bool {
        let expected = entry.expected_hash().unwrap();
        fs::read_dir(target)
            .unwrap()
            .all(|f| fingerprint::verify_file(&f.unwrap().path(), &expected).unwrap())
    }

    #[test]
    fn test_download_verifies_and_moves() {
        let root = tempdir().unwrap();
        let (target, cache_dir) = (root.path().join("new"), root.path().join("cache"));
        let body = b"new mod bytes";
        let fetcher = StaticFetcher::new(body);
        let cache = DownloadCache::new(&cache_dir, fetcher.clone());

        let mut reports = Vec::new();
        let outcome = cache
            .materialize_with_progress(&target, &entry(body), &mut |p: &DownloadProgress| {
                reports.push((p.downloaded, p.total))
            })
            .unwrap();

        assert_eq!(outcome, Materialized::Downloaded { bytes: body.len() as u64 });
        assert_eq!(fs::read(target.join("mod-2.0.jar")).unwrap(), body);
        assert!(!cache_dir.join("mod-2.0.jar").exists());
        assert_eq!(reports.last(), Some(&(body.len() as u64, Some(body.len() as u64))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_verified_target_is_noop() {
        let root = tempdir().unwrap();
        let target = root.path().join("new");
        fs::create_dir_all(&target).unwrap();
        let body = b"already here";
        fs::write(target.join("mod-2.0.jar"), body).unwrap();
        let fetcher = StaticFetcher::new(b"unused");
        let cache = DownloadCache::new(root.path().join("cache"), fetcher.clone());

        let outcome = cache.materialize(&target, &entry(body)).unwrap();
        assert_eq!(outcome, Materialized::AlreadyPresent);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_verified_cache_entry_is_moved() {
        let root = tempdir().unwrap();
        let (target, cache_dir) = (root.path().join("new"), root.path().join("cache"));
        fs::create_dir_all(&cache_dir).unwrap();
        let body = b"cached bytes";
        fs::write(cache_dir.join("mod-2.0.jar"), body).unwrap();
        let fetcher = StaticFetcher::new(b"unused");
        let cache = DownloadCache::new(&cache_dir, fetcher.clone());

        assert!(cache.is_cached(&entry(body)).unwrap());
        let outcome = cache.materialize(&target, &entry(body)).unwrap();

        assert_eq!(outcome, Materialized::FromCache);
        assert!(!cache_dir.join("mod-2.0.jar").exists());
        assert_eq!(fs::read(target.join("mod-2.0.jar")).unwrap(), body);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_corrupt_copies_are_redownloaded() {
        let root = tempdir().unwrap();
        let (target, cache_dir) = (root.path().join("new"), root.path().join("cache"));
        fs::create_dir_all(&target).unwrap();
        fs::create_dir_all(&cache_dir).unwrap();
        fs::write(target.join("mod-2.0.jar"), b"stale").unwrap();
        fs::write(cache_dir.join("mod-2.0.jar"), b"truncated").unwrap();
        let body = b"good bytes";
        let cache = DownloadCache::new(&cache_dir, StaticFetcher::new(body));

        let outcome = cache.materialize(&target, &entry(body)).unwrap();
        assert!(matches!(outcome, Materialized::Downloaded { .. }));
        assert!(target_files_verify(&target, &entry(body)));
    }

    #[test]
    fn test_mismatched_download_never_reaches_target() {
        let root = tempdir().unwrap();
        let (target, cache_dir) = (root.path().join("new"), root.path().join("cache"));
        let cache = DownloadCache::new(&cache_dir, StaticFetcher::new(b"tampered"));

        let err = cache.materialize(&target, &entry(b"genuine")).unwrap_err();
        assert!(err.is_integrity_mismatch());
        assert!(!target.join("mod-2.0.jar").exists());
        assert!(target_files_verify(&target, &entry(b"genuine")));
        // Left for the caller to inspect or discard
        assert_eq!(fs::read(cache_dir.join("mod-2.0.jar")).unwrap(), b"tampered");
    }

    #[test]
    fn test_failed_fetch_leaves_no_partial_file() {
        let root = tempdir().unwrap();
        let (target, cache_dir) = (root.path().join("new"), root.path().join("cache"));
        let cache = DownloadCache::new(&cache_dir, Arc::new(FailingFetcher));

        let err = cache.materialize(&target, &entry(b"x")).unwrap_err();
        assert!(matches!(err, Error::DownloadError(_)));
        assert_eq!(fs::read_dir(&cache_dir).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_digest_is_refused() {
        let root = tempdir().unwrap();
        let mut unverifiable = entry(b"x");
        unverifiable.sha512 = None;
        let fetcher = StaticFetcher::new(b"x");
        let cache = DownloadCache::new(root.path().join("cache"), fetcher.clone());

        let err = cache.materialize(root.path(), &unverifiable).unwrap_err();
        assert!(err.is_integrity_mismatch());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsafe_filenames_rejected() {
        for name in ["../evil.jar", "/etc/passwd", "a/b.jar", ""] {
            assert!(check_filename(name).is_err(), "{} accepted", name);
        }
        assert!(check_filename("mod-1.0+mc1.20.jar").is_ok());
    }
}
