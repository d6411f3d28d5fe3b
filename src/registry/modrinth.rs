// src/registry/modrinth.rs

//! Modrinth registry gateway
//!
//! Blocking HTTP client for the two lookups the resolver needs:
//! - `GET /version_file/{hash}?algorithm=sha512`
//! - `GET /project/{id}/version?loaders=["<tag>"]`
//!
//! HTTP 404 maps to [`RegistryError::NotFound`]; every other failure is
//! transient. Retrying is the resolver's job, not this client's.

use super::{FileEntry, RegistryError, RegistryGateway, RegistryResult, ReleaseRecord};
use crate::error::{Error, Result};
use crate::fingerprint::ContentHash;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Public Modrinth API root
pub const DEFAULT_API_BASE: &str = "https://api.modrinth.com/v2";

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Version object as returned by the API
#[derive(Debug, Deserialize)]
struct ApiVersion {
    id: String,
    project_id: String,
    version_number: String,
    #[serde(default)]
    loaders: Vec<String>,
    #[serde(default)]
    game_versions: Vec<String>,
    date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    files: Vec<ApiFile>,
}

#[derive(Debug, Deserialize)]
struct ApiFile {
    #[serde(default)]
    hashes: HashMap<String, String>,
    url: String,
    filename: String,
    #[serde(default)]
    primary: bool,
    size: Option<u64>,
}

impl From<ApiVersion> for ReleaseRecord {
    fn from(v: ApiVersion) -> Self {
        Self {
            id: v.id,
            series_id: v.project_id,
            version: v.version_number,
            compatibility_tags: v.loaders,
            environment_tags: v.game_versions,
            published: v.date_published,
            files: v
                .files
                .into_iter()
                .map(|mut f| FileEntry {
                    sha512: f.hashes.remove("sha512"),
                    filename: f.filename,
                    url: f.url,
                    size: f.size,
                    primary: f.primary,
                })
                .collect(),
        }
    }
}

/// HTTP gateway to a Modrinth-compatible registry
pub struct ModrinthClient {
    client: Client,
    base_url: String,
}

impl ModrinthClient {
    /// Create a client for the public API
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_API_BASE, HTTP_TIMEOUT)
    }

    /// Create a client for a specific API root
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("modupdater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> RegistryResult<T> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| RegistryError::Transient(format!("Request to {} failed: {}", url, e)))?;

        if let Some(err) = classify_status(response.status(), url) {
            return Err(err);
        }

        response
            .json()
            .map_err(|e| RegistryError::Transient(format!("Invalid response from {}: {}", url, e)))
    }
}

/// Map an HTTP status to a registry failure, if it is one
fn classify_status(status: StatusCode, url: &str) -> Option<RegistryError> {
    if status.is_success() {
        None
    } else if status == StatusCode::NOT_FOUND {
        Some(RegistryError::NotFound(url.to_string()))
    } else {
        Some(RegistryError::Transient(format!("HTTP {} from {}", status, url)))
    }
}

impl RegistryGateway for ModrinthClient {
    fn lookup_by_hash(&self, hash: &ContentHash) -> RegistryResult<ReleaseRecord> {
        let url = self.endpoint(&format!("version_file/{}", hash.as_hex()));
        let query = [("algorithm", hash.algorithm().as_str().to_string())];
        let version: ApiVersion = self.get_json(&url, &query)?;
        Ok(version.into())
    }

    fn list_compatible_releases(
        &self,
        series_id: &str,
        compatibility_tag: &str,
    ) -> RegistryResult<Vec<ReleaseRecord>> {
        let url = self.endpoint(&format!("project/{}/version", series_id));
        let loaders = serde_json::to_string(&[compatibility_tag]).map_err(|e| {
            RegistryError::Transient(format!("Failed to encode loader filter: {}", e))
        })?;
        let versions: Vec<ApiVersion> = self.get_json(&url, &[("loaders", loaders)])?;

        // The server filter is advisory; enforce the tag locally as well
        Ok(versions
            .into_iter()
            .map(ReleaseRecord::from)
            .filter(|r| r.has_compatibility(compatibility_tag))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION_JSON: &str = r#"{
        "id": "IZskON6d",
        "project_id": "AANobbMI",
        "name": "Sodium 0.5.8",
        "version_number": "mc1.20.1-0.5.8",
        "loaders": ["fabric", "quilt"],
        "game_versions": ["1.20", "1.20.1"],
        "date_published": "2024-02-06T20:55:45.000000Z",
        "files": [
            {
                "hashes": {"sha1": "d9c2", "sha512": "AB12"},
                "url": "https://cdn.modrinth.com/data/AANobbMI/versions/IZskON6d/sodium.jar",
                "filename": "sodium-fabric-mc1.20.1-0.5.8.jar",
                "primary": true,
                "size": 1024
            }
        ]
    }"#;

    #[test]
    fn test_version_conversion() {
        let version: ApiVersion = serde_json::from_str(VERSION_JSON).unwrap();
        let release = ReleaseRecord::from(version);

        assert_eq!(release.id, "IZskON6d");
        assert_eq!(release.series_id, "AANobbMI");
        assert_eq!(release.version, "mc1.20.1-0.5.8");
        assert!(release.has_compatibility("quilt"));
        assert!(release.supports_environment("1.20.1"));
        assert!(release.published.is_some());

        let file = release.primary_file().unwrap();
        assert_eq!(file.filename, "sodium-fabric-mc1.20.1-0.5.8.jar");
        assert_eq!(file.size, Some(1024));
        assert_eq!(file.expected_hash().unwrap().as_hex(), "ab12");
    }

    #[test]
    fn test_version_without_optional_fields() {
        let json = r#"{"id": "a", "project_id": "p", "version_number": "1.0"}"#;
        let release = ReleaseRecord::from(serde_json::from_str::<ApiVersion>(json).unwrap());
        assert!(release.files.is_empty());
        assert!(release.published.is_none());
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::OK, "u").is_none());
        assert!(classify_status(StatusCode::NOT_FOUND, "u").unwrap().is_not_found());
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "u"),
            Some(RegistryError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "u"),
            Some(RegistryError::Transient(_))
        ));
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        let client =
            ModrinthClient::with_base_url("https://example.com/v2/", HTTP_TIMEOUT).unwrap();
        assert_eq!(
            client.endpoint("/project/abc/version"),
            "https://example.com/v2/project/abc/version"
        );
    }
}
