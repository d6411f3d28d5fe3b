// src/registry/memory.rs

//! In-memory registry
//!
//! Serves a fixed set of releases without touching the network. Useful for
//! offline runs and for exercising the resolver against scripted
//! transient failures.

use super::{RegistryError, RegistryGateway, RegistryResult, ReleaseRecord};
use crate::fingerprint::ContentHash;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct State {
    by_hash: HashMap<String, ReleaseRecord>,
    by_series: HashMap<String, Vec<ReleaseRecord>>,
    /// Remaining transient failures keyed by hash hex or series id
    failures: HashMap<String, u32>,
    calls: usize,
}

/// Registry backed by in-process tables
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a content hash (hex) to the release it belongs to
    pub fn with_identity(self, hash_hex: &str, release: ReleaseRecord) -> Self {
        self.lock()
            .by_hash
            .insert(hash_hex.to_ascii_lowercase(), release);
        self
    }

    /// Append a release to its series, preserving insertion order
    pub fn with_release(self, release: ReleaseRecord) -> Self {
        self.lock()
            .by_series
            .entry(release.series_id.clone())
            .or_default()
            .push(release);
        self
    }

    /// Make the next `times` calls keyed by `key` fail transiently
    ///
    /// `key` is a hash hex for identity lookups or a series id for listings.
    pub fn fail_transiently(self, key: &str, times: u32) -> Self {
        self.lock().failures.insert(key.to_ascii_lowercase(), times);
        self
    }

    /// Number of gateway calls served so far
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn take_failure(&mut self, key: &str) -> Option<RegistryError> {
        let remaining = self.failures.get_mut(&key.to_ascii_lowercase())?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(RegistryError::Transient(format!("simulated failure for {}", key)))
    }
}

impl RegistryGateway for InMemoryRegistry {
    fn lookup_by_hash(&self, hash: &ContentHash) -> RegistryResult<ReleaseRecord> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(err) = state.take_failure(hash.as_hex()) {
            return Err(err);
        }
        state
            .by_hash
            .get(hash.as_hex())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("no release with hash {}", hash)))
    }

    fn list_compatible_releases(
        &self,
        series_id: &str,
        compatibility_tag: &str,
    ) -> RegistryResult<Vec<ReleaseRecord>> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(err) = state.take_failure(series_id) {
            return Err(err);
        }
        let releases = state
            .by_series
            .get(series_id)
            .ok_or_else(|| RegistryError::NotFound(format!("no series {}", series_id)))?;

        Ok(releases
            .iter()
            .filter(|r| r.has_compatibility(compatibility_tag))
            .cloned()
            .collect())
    }
}
