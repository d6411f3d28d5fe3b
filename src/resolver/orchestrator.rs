// src/resolver/orchestrator.rs

//! Concurrent resolution of an artifact set
//!
//! One resolution task per artifact runs on a worker pool capped at the
//! configured concurrency. Each task owns exactly one result slot and is
//! the only writer to it; the handle gives callers a live, read-only view.
//!
//! Reads are per record. Anything computed across records (progress,
//! the full result list) is a point-in-time approximation, not a
//! consistent snapshot of all tasks at one instant.

use super::{ResolutionResult, Resolver};
use crate::artifact::Artifact;
use crate::error::{Error, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Default cap on concurrently running resolution tasks
pub const DEFAULT_CONCURRENCY: usize = 8;

struct Shared {
    /// One slot per artifact, in submission order
    slots: Vec<RwLock<ResolutionResult>>,
    remaining: Mutex<usize>,
    finished: Condvar,
}

impl Shared {
    fn publish(&self, index: usize, snapshot: &ResolutionResult) {
        let mut slot = self.slots[index]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug_assert!(!slot.status.is_terminal(), "terminal result rewritten");
        *slot = snapshot.clone();
    }

    fn read(&self, index: usize) -> Option<ResolutionResult> {
        self.slots
            .get(index)
            .map(|slot| slot.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn remaining(&self) -> MutexGuard<'_, usize> {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_one(&self) {
        let mut remaining = self.remaining();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.finished.notify_all();
        }
    }
}

/// Counts a task as finished when dropped, even if it unwound
struct FinishGuard(Arc<Shared>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

/// Fans resolution out over a bounded worker pool
pub struct Orchestrator {
    resolver: Arc<Resolver>,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(resolver: Resolver, concurrency: usize) -> Self {
        Self {
            resolver: Arc::new(resolver),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Launch one task per artifact and return immediately
    pub fn resolve_all(&self, artifacts: Vec<Artifact>) -> Result<ResolutionHandle> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("resolve-{}", i))
            .panic_handler(|_| error!("Resolution task panicked"))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create worker pool: {}", e)))?;

        let shared = Arc::new(Shared {
            slots: artifacts
                .iter()
                .map(|a| RwLock::new(ResolutionResult::pending(a)))
                .collect(),
            remaining: Mutex::new(artifacts.len()),
            finished: Condvar::new(),
        });

        info!(
            "Resolving {} artifacts ({} workers, target {} / {})",
            artifacts.len(),
            self.concurrency,
            self.resolver.target().compatibility_tag,
            self.resolver.target().environment
        );

        for (index, artifact) in artifacts.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let resolver = Arc::clone(&self.resolver);
            pool.spawn(move || {
                let _guard = FinishGuard(Arc::clone(&shared));
                debug!("Starting resolution of {}", artifact.name);
                resolver.resolve_with(&artifact, &mut |snapshot: &ResolutionResult| {
                    shared.publish(index, snapshot)
                });
            });
        }

        Ok(ResolutionHandle {
            shared,
            _pool: pool,
        })
    }
}

/// Completion counts at one moment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub finished: usize,
    pub total: usize,
}

impl Progress {
    /// Whole-number percentage; an empty set counts as complete
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.finished.min(self.total) * 100) / self.total) as u8
    }
}

/// Live view of an in-flight resolution batch
///
/// Dropping the handle stops nothing: queued and running tasks finish and
/// write into results nobody reads.
pub struct ResolutionHandle {
    shared: Arc<Shared>,
    _pool: ThreadPool,
}

impl ResolutionHandle {
    pub fn len(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.slots.is_empty()
    }

    /// Current result of the artifact at `index` (submission order)
    pub fn get(&self, index: usize) -> Option<ResolutionResult> {
        self.shared.read(index)
    }

    /// Current result for an artifact name
    pub fn find(&self, artifact: &str) -> Option<ResolutionResult> {
        (0..self.len())
            .filter_map(|i| self.get(i))
            .find(|r| r.artifact == artifact)
    }

    /// Every result, each read independently
    pub fn results(&self) -> Vec<ResolutionResult> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Approximate completion, counted record by record
    pub fn progress(&self) -> Progress {
        let finished = self
            .shared
            .slots
            .iter()
            .filter(|slot| {
                slot.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .status
                    .is_terminal()
            })
            .count();
        Progress {
            finished,
            total: self.len(),
        }
    }

    /// True once every task has finished
    pub fn is_done(&self) -> bool {
        *self.shared.remaining() == 0
    }

    /// Block until every task has finished
    pub fn wait(&self) -> Vec<ResolutionResult> {
        let mut remaining = self.shared.remaining();
        while *remaining > 0 {
            remaining = self
                .shared
                .finished
                .wait(remaining)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(remaining);
        self.results()
    }

    /// Block until every task has finished or `timeout` elapses
    ///
    /// Returns whether the batch completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut remaining = self.shared.remaining();
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            remaining = self
                .shared
                .finished
                .wait_timeout(remaining, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
