// src/cache/fetch.rs

//! Streaming downloads

use crate::error::{Error, Result};
use crate::fingerprint::CHUNK_SIZE;
use reqwest::blocking::Client;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default timeout for HTTP requests (5 minutes, jars can be large)
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Progress of one file download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub filename: String,
    pub downloaded: u64,
    /// Total size, when the server or registry reports it
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Percentage complete, if the total is known
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) => Some(100),
            Some(total) => Some(((self.downloaded.min(total) * 100) / total) as u8),
            None => None,
        }
    }
}

/// Source of remote file bytes
pub trait Fetcher: Send + Sync {
    /// Stream the body at `url` into `sink`, returning the byte count
    ///
    /// `progress` receives (bytes so far, total if known) after each chunk.
    fn fetch(
        &self,
        url: &str,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64>;
}

/// Blocking HTTP fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("modupdater/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to download {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let total = response.content_length();
        debug!("Fetching {} ({:?} bytes)", url, total);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;
        loop {
            let n = match response.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::DownloadError(format!(
                        "Failed to read response from {}: {}",
                        url, e
                    )));
                }
            };
            sink.write_all(&buf[..n])
                .map_err(|e| Error::IoError(format!("Failed to write downloaded data: {}", e)))?;
            downloaded += n as u64;
            progress(downloaded, total);
        }

        Ok(downloaded)
    }
}
