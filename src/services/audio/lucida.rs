//! Lucida download service
//!
//! Web API that accepts a catalog URL from any platform and answers with
//! track metadata plus per-format download links. Falls back through
//! flac → wav → mp3 when the requested format is not offered.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    download_to_file, AudioDownloadResult, AudioDownloadService, AudioTrackInfo, ProbeCache,
    API_TIMEOUT, PROBE_TIMEOUT,
};
use crate::media::naming::sanitize_file_name;

const DEFAULT_ENDPOINTS: &[&str] = &["https://lucida.to", "https://lucida.su"];

const SUPPORTED_FORMATS: &[&str] = &["flac", "mp3", "wav", "aac", "ogg"];
const FLAC_FALLBACK: &[&str] = &["flac", "wav", "mp3"];

pub struct LucidaService {
    client: reqwest::Client,
    base_urls: Vec<String>,
    probe: ProbeCache,
}

impl LucidaService {
    /// API calls carry per-request timeouts; file downloads are unbounded
    /// and rely on cancellation, so the client itself has no timeout.
    pub fn new(proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }
        Ok(Self {
            client: builder.build()?,
            base_urls: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            probe: ProbeCache::new(),
        })
    }

    /// POST the track URL to `/api/load`, failing over across endpoints on
    /// network errors and 5xx. 4xx answers are authoritative.
    async fn fetch_track_data(&self, track_url: &str) -> Result<LucidaResponse> {
        let mut last_err: Option<anyhow::Error> = None;

        for base in &self.base_urls {
            let endpoint = format!("{}/api/load", base.trim_end_matches('/'));
            let request = self
                .client
                .post(&endpoint)
                .timeout(API_TIMEOUT)
                .form(&[("url", track_url)])
                .send()
                .await;

            match request {
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() {
                        bail!("lucida rejected request with {status}");
                    }
                    if !status.is_success() {
                        warn!(endpoint = %endpoint, status = %status, "Endpoint failed, trying next");
                        last_err = Some(anyhow::anyhow!("{endpoint} returned {status}"));
                        continue;
                    }

                    let body: LucidaResponse = response
                        .json()
                        .await
                        .context("failed to parse lucida response")?;
                    if !body.success {
                        bail!(
                            "lucida error: {}",
                            body.error.unwrap_or_else(|| "unknown".to_string())
                        );
                    }
                    return Ok(body);
                }
                Err(e) => {
                    last_err =
                        Some(anyhow::Error::new(e).context(format!("{endpoint} unreachable")));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no endpoints configured")))
    }

    /// Pick the download slot for the requested format, falling back to the
    /// best lossless-first alternative when asking for flac.
    fn select_format<'a>(
        formats: &'a [LucidaFormat],
        requested: &str,
    ) -> Option<&'a LucidaFormat> {
        let requested = requested.to_lowercase();

        if let Some(exact) = formats
            .iter()
            .find(|f| f.format.eq_ignore_ascii_case(&requested))
        {
            return Some(exact);
        }

        if requested == "flac" {
            for fallback in FLAC_FALLBACK {
                if let Some(f) = formats
                    .iter()
                    .find(|f| f.format.eq_ignore_ascii_case(fallback))
                {
                    return Some(f);
                }
            }
        }

        None
    }
}

#[async_trait]
impl AudioDownloadService for LucidaService {
    fn name(&self) -> &'static str {
        "lucida"
    }

    async fn is_available(&self) -> bool {
        self.probe
            .check(|| async {
                for base in &self.base_urls {
                    let probe = self
                        .client
                        .head(base)
                        .timeout(PROBE_TIMEOUT)
                        .send()
                        .await;
                    if matches!(&probe, Ok(r) if r.status().as_u16() < 500) {
                        return true;
                    }
                }
                false
            })
            .await
    }

    fn supports_format(&self, format: &str) -> bool {
        SUPPORTED_FORMATS
            .iter()
            .any(|f| f.eq_ignore_ascii_case(format))
    }

    async fn get_track_info(&self, url: &str) -> Result<AudioTrackInfo> {
        Ok(self.fetch_track_data(url).await?.track.into_info())
    }

    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        format: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult> {
        let response = self.fetch_track_data(url).await?;

        let slot = Self::select_format(&response.formats, format)
            .with_context(|| format!("format {format} not available for this track"))?
            .clone();

        tokio::fs::create_dir_all(dest_dir).await?;
        let info = response.track.into_info();
        let stem = sanitize_file_name(&format!("{} - {}", info.artist, info.title));
        let file_path = dest_dir.join(format!("{stem}.{}", slot.format.to_lowercase()));

        let size = download_to_file(&self.client, &slot.url, &file_path, cancel).await?;
        info!(
            path = %file_path.display(),
            format = %slot.format,
            size,
            "Audio downloaded from lucida"
        );

        Ok(AudioDownloadResult {
            file_path,
            track: AudioTrackInfo {
                quality: slot.quality.clone().or(info.quality.clone()),
                ..info
            },
            format: slot.format.to_lowercase(),
            size,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LucidaResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    track: LucidaTrack,
    #[serde(default)]
    formats: Vec<LucidaFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct LucidaTrack {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    isrc: String,
    #[serde(default)]
    platform: String,
    #[serde(rename = "cover", default)]
    cover_url: String,
}

impl LucidaTrack {
    fn into_info(self) -> AudioTrackInfo {
        AudioTrackInfo {
            id: self.id,
            title: self.title,
            artist: self.artist,
            album: self.album,
            duration_secs: self.duration,
            isrc: if self.isrc.is_empty() {
                None
            } else {
                Some(self.isrc)
            },
            platform: self.platform,
            cover_url: if self.cover_url.is_empty() {
                None
            } else {
                Some(self.cover_url)
            },
            quality: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LucidaFormat {
    format: String,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    size: i64,
    url: String,
}
