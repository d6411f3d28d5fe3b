// src/resolver/selection.rs

//! Candidate selection among compatible releases
//!
//! The registry's listing order is not trusted to be latest-first, so the
//! rule used to pick a candidate is explicit.

use crate::registry::ReleaseRecord;
use semver::Version;
use serde::{Deserialize, Serialize};

/// How the update candidate is chosen among matching releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionRule {
    /// First match in registry order
    RegistryOrder,
    /// Highest version among matches
    ///
    /// Compares semantic versions when every match parses as one, else
    /// publication dates when every match has one, else falls back to
    /// registry order. Ties keep the earlier release.
    #[default]
    HighestVersion,
}

/// Pick the candidate for `target_environment` from a series listing
pub fn select_candidate(
    releases: Vec<ReleaseRecord>,
    target_environment: &str,
    rule: SelectionRule,
) -> Option<ReleaseRecord> {
    let mut matches: Vec<ReleaseRecord> = releases
        .into_iter()
        .filter(|r| r.supports_environment(target_environment))
        .collect();

    if matches.is_empty() {
        return None;
    }

    let index = match rule {
        SelectionRule::RegistryOrder => 0,
        SelectionRule::HighestVersion => highest_index(&matches),
    };
    Some(matches.swap_remove(index))
}

fn highest_index(matches: &[ReleaseRecord]) -> usize {
    let versions: Option<Vec<Version>> =
        matches.iter().map(|r| parse_lenient(&r.version)).collect();
    if let Some(versions) = versions {
        return first_max_index(&versions);
    }

    let dates: Option<Vec<_>> = matches.iter().map(|r| r.published).collect();
    if let Some(dates) = dates {
        return first_max_index(&dates);
    }

    0
}

/// Index of the maximum element; the earliest wins on ties
fn first_max_index<T: Ord>(keys: &[T]) -> usize {
    let mut best = 0;
    for (i, key) in keys.iter().enumerate().skip(1) {
        if *key > keys[best] {
            best = i;
        }
    }
    best
}

/// Parse a version label, tolerating a `v` prefix and missing components
///
/// `v1.2` parses as `1.2.0`, `3-beta` as `3.0.0-beta`.
pub fn parse_lenient(label: &str) -> Option<Version> {
    let trimmed = label.trim().trim_start_matches(['v', 'V']);
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(split);
    if core.is_empty() {
        return None;
    }
    let parts = core.split('.').count();
    if parts >= 3 {
        return None;
    }

    let padded = format!("{}{}{}", core, ".0".repeat(3 - parts), rest);
    Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn release(id: &str, version: &str, envs: &[&str]) -> ReleaseRecord {
        let mut r = ReleaseRecord::new(id, "proj", version);
        r.environment_tags = envs.iter().map(|s| s.to_string()).collect();
        r
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(parse_lenient("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_lenient("v1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_lenient("3").unwrap(), Version::new(3, 0, 0));
        assert_eq!(parse_lenient("3-beta").unwrap().pre.as_str(), "beta");
        assert_eq!(parse_lenient("0.5.8+mc1.20.1").unwrap().minor, 5);
        assert!(parse_lenient("mc1.20.1-0.5.8").is_none());
        assert!(parse_lenient("").is_none());
    }

    #[test]
    fn test_no_match_yields_none() {
        let releases = vec![release("a", "2.0.0", &["1.19"])];
        assert!(select_candidate(releases, "1.20.1", SelectionRule::HighestVersion).is_none());
    }

    #[test]
    fn test_registry_order_takes_first_match() {
        let releases = vec![
            release("old", "1.0.0", &["1.20.1"]),
            release("new", "2.0.0", &["1.20.1"]),
        ];
        let picked = select_candidate(releases, "1.20.1", SelectionRule::RegistryOrder).unwrap();
        assert_eq!(picked.id, "old");
    }

    #[test]
    fn test_highest_version_ignores_registry_order() {
        let releases = vec![
            release("mid", "1.10.0", &["1.20.1"]),
            release("skip", "9.0.0", &["1.19"]),
            release("top", "1.11", &["1.20.1"]),
            release("low", "1.9.9", &["1.20.1"]),
        ];
        let picked = select_candidate(releases, "1.20.1", SelectionRule::HighestVersion).unwrap();
        assert_eq!(picked.id, "top");
    }

    #[test]
    fn test_highest_version_falls_back_to_publish_date() {
        let mut a = release("a", "mc1.20.1-0.5.7", &["1.20.1"]);
        a.published = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut b = release("b", "mc1.20.1-0.5.8", &["1.20.1"]);
        b.published = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());

        let picked = select_candidate(vec![a, b], "1.20.1", SelectionRule::HighestVersion).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn test_highest_version_without_keys_keeps_registry_order() {
        let releases = vec![
            release("first", "alpha", &["1.20.1"]),
            release("second", "beta", &["1.20.1"]),
        ];
        let picked = select_candidate(releases, "1.20.1", SelectionRule::HighestVersion).unwrap();
        assert_eq!(picked.id, "first");
    }

    #[test]
    fn test_ties_keep_earlier_release() {
        let releases = vec![
            release("first", "2.0.0", &["1.20.1"]),
            release("second", "2.0", &["1.20.1"]),
        ];
        let picked = select_candidate(releases, "1.20.1", SelectionRule::HighestVersion).unwrap();
        assert_eq!(picked.id, "first");
    }
}
