//! Lossless audio download services
//!
//! The three services differ only in download strategy; the cascade iterates
//! them uniformly through the `AudioDownloadService` trait. HTTP-backed
//! services support multiple base endpoints with 5xx/network failover.

pub mod cascade;
pub mod lucida;
pub mod orpheus;
pub mod tidal_hifi;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use cascade::{AudioSourceCascade, CascadeFailure, CascadeOutcome, CascadeRequest};

/// Timeout for cheap health probes
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for metadata/API calls; downloads are unbounded and rely on
/// cancellation plus the pipeline's outer envelope
pub(crate) const API_TIMEOUT: Duration = Duration::from_secs(60);
/// How long a health probe result stays cached
const PROBE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Track metadata as reported by a download service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

/// A finished audio download
#[derive(Debug, Clone)]
pub struct AudioDownloadResult {
    pub file_path: PathBuf,
    pub track: AudioTrackInfo,
    pub format: String,
    pub size: u64,
}

/// Raised by `download_by_search` when the service found tracks but none
/// matched the requested identity. Carries the scored candidates so the
/// cascade can surface them for manual selection.
#[derive(Debug)]
pub struct SearchNoMatch {
    pub candidates: Vec<crate::queue::item::AudioCandidate>,
    pub best_score: f64,
}

impl std::fmt::Display for SearchNoMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} search results, best score {:.2} below threshold",
            self.candidates.len(),
            self.best_score
        )
    }
}

impl std::error::Error for SearchNoMatch {}

/// Contract every audio download service implements
#[async_trait]
pub trait AudioDownloadService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap health probe; implementations may cache the result briefly.
    async fn is_available(&self) -> bool;

    fn supports_format(&self, format: &str) -> bool;

    /// Metadata for a catalog URL without downloading.
    async fn get_track_info(&self, url: &str) -> Result<AudioTrackInfo>;

    /// Download a catalog URL into `dest_dir` in the requested format.
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        format: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult>;

    /// Whether `download_by_search` is implemented.
    fn supports_search(&self) -> bool {
        false
    }

    /// Find and download a track from free-text artist/title.
    async fn download_by_search(
        &self,
        _artist: &str,
        _title: &str,
        _dest_dir: &Path,
        _cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult> {
        bail!("{} does not support search downloads", self.name())
    }
}

/// Cached result of a service health probe
pub(crate) struct ProbeCache {
    state: Mutex<Option<(Instant, bool)>>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    pub async fn check<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        if let Some((at, result)) = *self.state.lock() {
            if at.elapsed() < PROBE_CACHE_TTL {
                return result;
            }
        }
        let result = probe().await;
        *self.state.lock() = Some((Instant::now(), result));
        result
    }
}

/// GET with failover across base URLs.
///
/// Network errors and 5xx responses advance to the next endpoint; a 4xx is
/// authoritative and fails immediately.
pub(crate) async fn get_with_failover(
    client: &reqwest::Client,
    base_urls: &[String],
    path_and_query: &str,
) -> Result<reqwest::Response> {
    let mut last_err: Option<anyhow::Error> = None;

    for base in base_urls {
        let url = format!("{}{}", base.trim_end_matches('/'), path_and_query);
        match client.get(&url).timeout(API_TIMEOUT).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                if status.is_client_error() {
                    bail!("request to {url} rejected with {status}");
                }
                warn!(url = %url, status = %status, "Endpoint failed, trying next");
                last_err = Some(anyhow::anyhow!("{url} returned {status}"));
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Endpoint unreachable, trying next");
                last_err = Some(anyhow::Error::new(e).context(format!("request to {url} failed")));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no endpoints configured")))
}

/// Stream an HTTP body to disk, honoring cancellation. A cancelled or failed
/// download leaves no partial file behind.
pub(crate) async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    use tokio::io::AsyncWriteExt;

    let mut response = client
        .get(url)
        .send()
        .await
        .context("failed to start download")?;

    if !response.status().is_success() {
        bail!("download server returned {}", response.status());
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("failed to create {}", dest.display()))?;
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::select! {
            chunk = response.chunk() => chunk,
            _ = cancel.cancelled() => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                bail!("download cancelled");
            }
        };

        match chunk {
            Ok(Some(bytes)) => {
                if let Err(e) = file.write_all(&bytes).await {
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(e).context("write failed mid-download");
                }
                written += bytes.len() as u64;
            }
            Ok(None) => break,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(e).context("download interrupted");
            }
        }
    }

    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_probe_cache_returns_cached_result() {
        let cache = ProbeCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .check(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            })
            .await;
        let second = cache
            .check(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            })
            .await;

        assert!(first);
        assert!(second, "second call should reuse the cached probe");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
