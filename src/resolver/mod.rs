// src/resolver/mod.rs

//! Update resolution for local artifacts
//!
//! Each artifact is resolved independently by a [`Resolver`] run:
//! 1. Fingerprint the file and look up the release it belongs to
//! 2. List the series' releases for the compatibility tag and pick the
//!    candidate for the target environment
//!
//! Transient registry failures restart the run from step 1 after a
//! backoff, up to the retry bound. A "not found" answer is terminal and
//! never retried. Concurrent fan-out lives in [`orchestrator`].

pub mod orchestrator;
pub mod selection;

use crate::artifact::Artifact;
use crate::registry::{RegistryError, RegistryGateway, ReleaseRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use orchestrator::{Orchestrator, Progress, ResolutionHandle};
pub use selection::{SelectionRule, select_candidate};

/// Upper bound on any single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Lifecycle of one artifact's resolution
///
/// Transitions only move forward: `Pending -> Resolving -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStatus {
    Pending,
    Resolving,
    /// Lookups succeeded; `candidate` may still be empty
    Resolved,
    /// Identity (and series) absent from the registry
    NotFound,
    /// Transient failures hit the retry bound
    ExhaustedRetries,
    /// Local I/O failure reading the artifact
    Failed,
}

impl ResolutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResolutionStatus::Pending | ResolutionStatus::Resolving)
    }

    fn rank(&self) -> u8 {
        match self {
            ResolutionStatus::Pending => 0,
            ResolutionStatus::Resolving => 1,
            _ => 2,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Resolving => "resolving",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::NotFound => "not_found",
            ResolutionStatus::ExhaustedRetries => "exhausted_retries",
            ResolutionStatus::Failed => "failed",
        }
    }
}

/// What a result means to someone choosing updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Still resolving
    Pending,
    UpToDate,
    UpdateAvailable,
    /// Release found, but nothing in the series targets the environment
    NoCompatibleVersion,
    NotFound,
    /// Retries exhausted or local failure
    LookupFailed,
}

impl Availability {
    pub fn label(&self) -> &str {
        match self {
            Availability::Pending => "checking",
            Availability::UpToDate => "up to date",
            Availability::UpdateAvailable => "update available",
            Availability::NoCompatibleVersion => "no compatible version",
            Availability::NotFound => "not found",
            Availability::LookupFailed => "lookup failed",
        }
    }
}

/// Resolution state of one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    pub artifact: String,
    pub filename: String,
    pub local_version: Option<String>,
    /// Release the local file belongs to
    pub current: Option<ReleaseRecord>,
    /// Release selected for the target environment
    pub candidate: Option<ReleaseRecord>,
    pub status: ResolutionStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl ResolutionResult {
    pub fn pending(artifact: &Artifact) -> Self {
        Self {
            artifact: artifact.name.clone(),
            filename: artifact.filename.clone(),
            local_version: artifact.version.clone(),
            current: None,
            candidate: None,
            status: ResolutionStatus::Pending,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Move to `next`, refusing backward moves and moves out of a terminal state
    pub fn advance(&mut self, next: ResolutionStatus) -> bool {
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    /// Version label of what is installed now
    pub fn current_version_label(&self) -> &str {
        self.current
            .as_ref()
            .map(|r| r.version.as_str())
            .or(self.local_version.as_deref())
            .unwrap_or("unknown")
    }

    pub fn candidate_version_label(&self) -> Option<&str> {
        self.candidate.as_ref().map(|r| r.version.as_str())
    }

    pub fn availability(&self) -> Availability {
        match self.status {
            ResolutionStatus::Pending | ResolutionStatus::Resolving => Availability::Pending,
            ResolutionStatus::NotFound => Availability::NotFound,
            ResolutionStatus::ExhaustedRetries | ResolutionStatus::Failed => {
                Availability::LookupFailed
            }
            ResolutionStatus::Resolved => match &self.candidate {
                None => Availability::NoCompatibleVersion,
                Some(candidate) => {
                    let same = match &self.current {
                        Some(current) => {
                            current.id == candidate.id || current.version == candidate.version
                        }
                        None => self.local_version.as_deref() == Some(candidate.version.as_str()),
                    };
                    if same {
                        Availability::UpToDate
                    } else {
                        Availability::UpdateAvailable
                    }
                }
            },
        }
    }

    pub fn has_update(&self) -> bool {
        self.availability() == Availability::UpdateAvailable
    }
}

/// Sleep schedule between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(n-1)` for the n-th retry, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the retry following the `retry`-th failure (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay.min(MAX_BACKOFF),
            Backoff::Exponential { base, max } => {
                let shift = retry.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max).min(MAX_BACKOFF)
            }
        }
    }
}

/// Retry bound and backoff for transient registry failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive transient failures that end the run; 0 is treated as 1
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self { max_retries, backoff }
    }

    fn bound(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Backoff::Fixed(Duration::from_secs(1)))
    }
}

/// What to resolve against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Tag a release must carry, e.g. a loader kind
    pub compatibility_tag: String,
    /// Environment the candidate must support, e.g. a game version
    pub environment: String,
}

impl Target {
    pub fn new(compatibility_tag: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            compatibility_tag: compatibility_tag.into(),
            environment: environment.into(),
        }
    }
}

enum AttemptError {
    NotFound(String),
    Transient(String),
    Local(String),
}

impl From<RegistryError> for AttemptError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(msg) => AttemptError::NotFound(msg),
            RegistryError::Transient(msg) => AttemptError::Transient(msg),
        }
    }
}

/// Resolves artifacts against a registry
pub struct Resolver {
    gateway: Arc<dyn RegistryGateway>,
    target: Target,
    policy: RetryPolicy,
    rule: SelectionRule,
}

impl Resolver {
    pub fn new(gateway: Arc<dyn RegistryGateway>, target: Target, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            target,
            policy,
            rule: SelectionRule::default(),
        }
    }

    pub fn with_selection(mut self, rule: SelectionRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Resolve one artifact to a terminal result
    pub fn resolve(&self, artifact: &Artifact) -> ResolutionResult {
        self.resolve_with(artifact, &mut |_: &ResolutionResult| {})
    }

    /// Resolve one artifact, publishing every state change to `publish`
    ///
    /// The last published snapshot is the returned terminal result.
    pub fn resolve_with(
        &self,
        artifact: &Artifact,
        publish: &mut dyn FnMut(&ResolutionResult),
    ) -> ResolutionResult {
        let mut result = ResolutionResult::pending(artifact);
        result.advance(ResolutionStatus::Resolving);
        publish(&result);

        loop {
            match self.attempt(artifact) {
                Ok((current, candidate)) => {
                    info!(
                        "Resolved {}: {} -> {}",
                        artifact.name,
                        current.as_ref().map_or(artifact.version_label(), |r| r.version.as_str()),
                        candidate.as_ref().map_or("no compatible version", |r| r.version.as_str())
                    );
                    result.current = current;
                    result.candidate = candidate;
                    result.advance(ResolutionStatus::Resolved);
                    break;
                }
                Err(AttemptError::NotFound(reason)) => {
                    warn!("{} not found in registry: {}", artifact.name, reason);
                    result.last_error = Some(reason);
                    result.advance(ResolutionStatus::NotFound);
                    break;
                }
                Err(AttemptError::Local(reason)) => {
                    warn!("Cannot resolve {}: {}", artifact.name, reason);
                    result.last_error = Some(reason);
                    result.advance(ResolutionStatus::Failed);
                    break;
                }
                Err(AttemptError::Transient(reason)) => {
                    result.retry_count += 1;
                    result.last_error = Some(reason);
                    if result.retry_count >= self.policy.bound() {
                        warn!(
                            "Giving up on {} after {} failed attempts",
                            artifact.name, result.retry_count
                        );
                        result.advance(ResolutionStatus::ExhaustedRetries);
                        break;
                    }

                    let delay = self.policy.backoff.delay(result.retry_count);
                    warn!(
                        "Resolving {} failed (retry {}): {}, retrying in {:?}",
                        artifact.name,
                        result.retry_count,
                        result.last_error.as_deref().unwrap_or_default(),
                        delay
                    );
                    publish(&result);
                    std::thread::sleep(delay);
                }
            }
        }

        publish(&result);
        result
    }

    /// One pass over both lookups
    fn attempt(
        &self,
        artifact: &Artifact,
    ) -> std::result::Result<(Option<ReleaseRecord>, Option<ReleaseRecord>), AttemptError> {
        let hash = artifact
            .content_hash()
            .map_err(|e| AttemptError::Local(e.to_string()))?;

        let current = match self.gateway.lookup_by_hash(hash) {
            Ok(release) => Some(release),
            Err(RegistryError::NotFound(reason)) => {
                if artifact.series_hint.is_none() {
                    return Err(AttemptError::NotFound(reason));
                }
                debug!(
                    "{} unknown by hash, falling back to local series hint",
                    artifact.name
                );
                None
            }
            Err(err) => return Err(err.into()),
        };

        let Some(series) = current
            .as_ref()
            .map(|r| r.series_id.as_str())
            .or(artifact.series_hint.as_deref())
        else {
            return Err(AttemptError::NotFound(format!(
                "no series known for {}",
                artifact.name
            )));
        };

        let releases = self
            .gateway
            .list_compatible_releases(series, &self.target.compatibility_tag)?;
        debug!(
            "{} candidate releases for {} ({})",
            releases.len(),
            artifact.name,
            self.target.compatibility_tag
        );

        let candidate = select_candidate(releases, &self.target.environment, self.rule);
        Ok((current, candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use tempfile::TempDir;

    fn release(id: &str, version: &str, env: &str) -> ReleaseRecord {
        let mut r = ReleaseRecord::new(id, "proj-a", version);
        r.compatibility_tags = vec!["fabric".to_string()];
        r.environment_tags = vec![env.to_string()];
        r
    }

    fn artifact(dir: &TempDir, name: &str, content: &[u8]) -> (Artifact, String) {
        let path = dir.path().join(format!("{}.jar", name));
        std::fs::write(&path, content).unwrap();
        let artifact = Artifact::new(name, path);
        let hex = artifact.content_hash().unwrap().as_hex().to_string();
        (artifact, hex)
    }

    fn resolver(registry: InMemoryRegistry, max_retries: u32) -> Resolver {
        Resolver::new(
            Arc::new(registry),
            Target::new("fabric", "1.20.1"),
            RetryPolicy::new(max_retries, Backoff::Fixed(Duration::ZERO)),
        )
    }

    #[test]
    fn test_status_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = artifact(&dir, "ModA", b"a");
        let mut result = ResolutionResult::pending(&a);

        assert!(result.advance(ResolutionStatus::Resolving));
        assert!(result.advance(ResolutionStatus::Resolving));
        assert!(result.advance(ResolutionStatus::NotFound));
        assert!(!result.advance(ResolutionStatus::Pending));
        assert!(!result.advance(ResolutionStatus::Resolved));
        assert_eq!(result.status, ResolutionStatus::NotFound);
    }

    #[test]
    fn test_resolves_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let (a, hex) = artifact(&dir, "ModA", b"mod a 1.0");
        let registry = InMemoryRegistry::new()
            .with_identity(&hex, release("r1", "1.0", "1.19"))
            .with_release(release("r2", "2.0", "1.20.1"))
            .with_release(release("r1", "1.0", "1.19"));

        let result = resolver(registry, 5).resolve(&a);
        assert_eq!(result.status, ResolutionStatus::Resolved);
        assert_eq!(result.current_version_label(), "1.0");
        assert_eq!(result.candidate_version_label(), Some("2.0"));
        assert_eq!(result.availability(), Availability::UpdateAvailable);
    }

    #[test]
    fn test_no_compatible_version_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let (b, hex) = artifact(&dir, "ModB", b"mod b");
        let registry = InMemoryRegistry::new()
            .with_identity(&hex, release("r1", "1.0", "1.19"))
            .with_release(release("r1", "1.0", "1.19"));

        let result = resolver(registry, 5).resolve(&b);
        assert_eq!(result.status, ResolutionStatus::Resolved);
        assert!(result.candidate.is_none());
        assert_eq!(result.availability(), Availability::NoCompatibleVersion);
    }

    #[test]
    fn test_not_found_is_never_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _) = artifact(&dir, "ModC", b"mod c");
        let registry = Arc::new(InMemoryRegistry::new());
        let resolver = Resolver::new(
            registry.clone(),
            Target::new("fabric", "1.20.1"),
            RetryPolicy::new(5, Backoff::Fixed(Duration::ZERO)),
        );

        let result = resolver.resolve(&c);
        assert_eq!(result.status, ResolutionStatus::NotFound);
        assert_eq!(result.retry_count, 0);
        assert_eq!(registry.call_count(), 1);
        assert_eq!(result.availability(), Availability::NotFound);
    }

    #[test]
    fn test_series_hint_recovers_from_unknown_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = artifact(&dir, "ModA", b"locally built");
        let a = a.with_series_hint("proj-a").with_version("1.0");
        let registry = InMemoryRegistry::new().with_release(release("r2", "2.0", "1.20.1"));

        let result = resolver(registry, 5).resolve(&a);
        assert_eq!(result.status, ResolutionStatus::Resolved);
        assert!(result.current.is_none());
        assert_eq!(result.current_version_label(), "1.0");
        assert_eq!(result.availability(), Availability::UpdateAvailable);
    }

    #[test]
    fn test_missing_series_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (a, hex) = artifact(&dir, "ModA", b"orphan");
        let mut orphan = release("r1", "1.0", "1.20.1");
        orphan.series_id = "gone".to_string();
        let registry = InMemoryRegistry::new().with_identity(&hex, orphan);

        let result = resolver(registry, 5).resolve(&a);
        assert_eq!(result.status, ResolutionStatus::NotFound);
        assert_eq!(result.retry_count, 0);
    }

    #[test]
    fn test_transient_failures_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let (a, hex) = artifact(&dir, "ModA", b"flaky");
        let registry = InMemoryRegistry::new()
            .with_identity(&hex, release("r1", "1.0", "1.19"))
            .with_release(release("r2", "2.0", "1.20.1"))
            .fail_transiently(&hex, 2);

        let result = resolver(registry, 5).resolve(&a);
        assert_eq!(result.status, ResolutionStatus::Resolved);
        assert_eq!(result.retry_count, 2);
    }

    #[test]
    fn test_listing_failure_restarts_from_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (a, hex) = artifact(&dir, "ModA", b"flaky listing");
        let registry = Arc::new(
            InMemoryRegistry::new()
                .with_identity(&hex, release("r1", "1.0", "1.19"))
                .with_release(release("r2", "2.0", "1.20.1"))
                .fail_transiently("proj-a", 1),
        );
        let resolver = Resolver::new(
            registry.clone(),
            Target::new("fabric", "1.20.1"),
            RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO)),
        );

        let result = resolver.resolve(&a);
        assert_eq!(result.status, ResolutionStatus::Resolved);
        assert_eq!(result.retry_count, 1);
        // lookup, failed listing, lookup again, listing
        assert_eq!(registry.call_count(), 4);
    }

    #[test]
    fn test_exhausts_exactly_at_bound() {
        let dir = tempfile::tempdir().unwrap();
        let (a, hex) = artifact(&dir, "ModA", b"down");

        // One failure short of the bound still succeeds
        let registry = InMemoryRegistry::new()
            .with_identity(&hex, release("r1", "1.0", "1.20.1"))
            .with_release(release("r1", "1.0", "1.20.1"))
            .fail_transiently(&hex, 2);
        let result = resolver(registry, 3).resolve(&a);
        assert_eq!(result.status, ResolutionStatus::Resolved);
        assert_eq!(result.availability(), Availability::UpToDate);

        let registry = InMemoryRegistry::new()
            .with_identity(&hex, release("r1", "1.0", "1.20.1"))
            .fail_transiently(&hex, 3);
        let result = resolver(registry, 3).resolve(&a);
        assert_eq!(result.status, ResolutionStatus::ExhaustedRetries);
        assert_eq!(result.retry_count, 3);
        assert!(result.last_error.is_some());
        assert_eq!(result.availability(), Availability::LookupFailed);
    }

    #[test]
    fn test_unreadable_artifact_fails_without_retry() {
        let a = Artifact::new("Gone", "/nonexistent/gone.jar");
        let result = resolver(InMemoryRegistry::new(), 5).resolve(&a);
        assert_eq!(result.status, ResolutionStatus::Failed);
        assert_eq!(result.retry_count, 0);
    }

    #[test]
    fn test_published_snapshots_move_forward() {
        let dir = tempfile::tempdir().unwrap();
        let (a, hex) = artifact(&dir, "ModA", b"observed");
        let registry = InMemoryRegistry::new()
            .with_identity(&hex, release("r1", "1.0", "1.20.1"))
            .with_release(release("r1", "1.0", "1.20.1"))
            .fail_transiently(&hex, 1);

        let mut seen = Vec::new();
        resolver(registry, 5).resolve_with(&a, &mut |r: &ResolutionResult| seen.push(r.status));

        assert_eq!(seen.first(), Some(&ResolutionStatus::Resolving));
        assert_eq!(seen.last(), Some(&ResolutionStatus::Resolved));
        let ranks: Vec<_> = seen.iter().map(|s| s.rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_backoff_schedule() {
        let fixed = Backoff::Fixed(Duration::from_millis(500));
        assert_eq!(fixed.delay(1), Duration::from_millis(500));
        assert_eq!(fixed.delay(7), Duration::from_millis(500));

        let exp = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(exp.delay(1), Duration::from_millis(100));
        assert_eq!(exp.delay(3), Duration::from_millis(400));
        assert_eq!(exp.delay(10), Duration::from_secs(1));
        assert_eq!(Backoff::Fixed(Duration::from_secs(600)).delay(1), MAX_BACKOFF);
    }
}
