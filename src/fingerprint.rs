// src/fingerprint.rs

//! Content fingerprinting for local artifacts
//!
//! A fingerprint is the registry's identity key for a file: the hex digest
//! of its bytes. Files are streamed through the digest in fixed-size chunks,
//! so memory use stays constant regardless of file size.

use crate::error::{Error, Result};
use sha2::digest::Output;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Read buffer size used when streaming files through a digest
pub const CHUNK_SIZE: usize = 8192;

/// Digest algorithm for content hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    Sha256,
    /// Registry identity hash
    #[default]
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

/// A hex-encoded digest tagged with the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    hex: String,
}

impl ContentHash {
    /// Wrap an existing hex digest (normalized to lowercase)
    pub fn new(algorithm: HashAlgorithm, hex: impl Into<String>) -> Self {
        Self {
            algorithm,
            hex: hex.into().to_ascii_lowercase(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Compare against an expected hex digest, ignoring case
    pub fn matches(&self, expected_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(expected_hex)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Compute the registry identity hash of a file
pub fn fingerprint(path: &Path) -> Result<ContentHash> {
    fingerprint_with(path, HashAlgorithm::default())
}

/// Compute a content hash of a file with an explicit algorithm
pub fn fingerprint_with(path: &Path, algorithm: HashAlgorithm) -> Result<ContentHash> {
    debug!("Fingerprinting {} ({})", path.display(), algorithm.as_str());

    let file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open {} for hashing: {}", path.display(), e))
    })?;

    let hex = match algorithm {
        HashAlgorithm::Sha256 => digest_reader::<Sha256>(file).map(|d| format!("{:x}", d)),
        HashAlgorithm::Sha512 => digest_reader::<Sha512>(file).map(|d| format!("{:x}", d)),
    }
    .map_err(|e| Error::IoError(format!("Failed to read {} for hashing: {}", path.display(), e)))?;

    Ok(ContentHash::new(algorithm, hex))
}

/// Identity hash of in-memory bytes
pub fn fingerprint_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash::new(HashAlgorithm::Sha512, format!("{:x}", Sha512::digest(bytes)))
}

/// Check whether a file's content matches an expected hash
///
/// A missing file is reported as a mismatch, not an error.
pub fn verify_file(path: &Path, expected: &ContentHash) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let actual = fingerprint_with(path, expected.algorithm())?;
    Ok(actual.matches(expected.as_hex()))
}

fn digest_reader<D: Digest>(mut reader: impl Read) -> io::Result<Output<D>> {
    let mut hasher = D::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hasher.finalize())
}
