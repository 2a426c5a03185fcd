//! TidalHifi download service
//!
//! Talks to a tidal-hifi proxy API: track info at `/info/<id>`, search at
//! `/search/?s=`, and a stream manifest (base64 JSON) at `/track/?id=`.
//! Handles tidal catalog URLs only, but is the one service that supports
//! text search, which backs the cascade's search fallback.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    download_to_file, get_with_failover, AudioDownloadResult, AudioDownloadService,
    AudioTrackInfo, ProbeCache, PROBE_TIMEOUT,
};
use crate::media::naming::sanitize_file_name;
use crate::queue::item::{AudioCandidate, VideoInfo};
use crate::services::matcher::{match_video_to_audio, MatchOptions};

const DEFAULT_ENDPOINTS: &[&str] = &["https://vogel.qqdl.site", "https://hifi.401658.xyz"];

static TIDAL_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:/track/|tidal:track:)(\d+)").unwrap()
});

/// Extract the numeric track id from any tidal URL shape.
pub fn extract_tidal_id(url: &str) -> Result<u64> {
    TIDAL_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .with_context(|| format!("no tidal track id in {url}"))
}

pub struct TidalHifiService {
    client: reqwest::Client,
    base_urls: Vec<String>,
    probe: ProbeCache,
}

impl TidalHifiService {
    /// API calls carry per-request timeouts; stream downloads are unbounded
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

    async fn get_track_by_id(&self, id: u64) -> Result<TidalTrack> {
        let response =
            get_with_failover(&self.client, &self.base_urls, &format!("/info/{id}")).await?;
        let body: TidalTrackEnvelope = response
            .json()
            .await
            .context("failed to parse track info")?;
        Ok(body.data)
    }

    async fn search_track(&self, query: &str) -> Result<Vec<TidalTrack>> {
        let encoded: String = query
            .chars()
            .map(|c| if c == ' ' { '+' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '.'))
            .collect();
        let response = get_with_failover(
            &self.client,
            &self.base_urls,
            &format!("/search/?s={encoded}"),
        )
        .await?;
        let body: TidalSearchEnvelope = response
            .json()
            .await
            .context("failed to parse search response")?;

        let items = body.items();
        if items.is_empty() {
            bail!("no tracks found for '{query}'");
        }
        Ok(items)
    }

    async fn get_stream_url(&self, id: u64) -> Result<String> {
        let response = get_with_failover(
            &self.client,
            &self.base_urls,
            &format!("/track/?id={id}&quality=LOSSLESS"),
        )
        .await?;
        let body: TidalStreamEnvelope = response
            .json()
            .await
            .context("failed to parse stream response")?;

        let manifest_b64 = body.data.manifest;
        if manifest_b64.is_empty() {
            bail!("no manifest for track {id}");
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(manifest_b64.as_bytes())
            .context("failed to decode manifest")?;
        let manifest: TidalManifest =
            serde_json::from_slice(&decoded).context("failed to parse manifest")?;

        manifest
            .urls
            .into_iter()
            .next()
            .with_context(|| format!("no download URLs in manifest for track {id}"))
    }

    async fn download_track(
        &self,
        track: TidalTrack,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult> {
        let stream_url = self.get_stream_url(track.id).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let info = track.into_info();
        let stem = sanitize_file_name(&format!("{} - {}", info.artist, info.title));
        let file_path = dest_dir.join(format!("{stem}.flac"));

        let size = download_to_file(&self.client, &stream_url, &file_path, cancel).await?;
        info!(path = %file_path.display(), size, "FLAC downloaded from tidal");

        Ok(AudioDownloadResult {
            file_path,
            track: info,
            format: "flac".to_string(),
            size,
        })
    }
}

#[async_trait]
impl AudioDownloadService for TidalHifiService {
    fn name(&self) -> &'static str {
        "tidal-hifi"
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
        format.eq_ignore_ascii_case("flac")
    }

    async fn get_track_info(&self, url: &str) -> Result<AudioTrackInfo> {
        let id = extract_tidal_id(url)?;
        Ok(self.get_track_by_id(id).await?.into_info())
    }

    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        format: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult> {
        if !self.supports_format(format) {
            bail!("tidal-hifi only provides flac");
        }
        let id = extract_tidal_id(url)?;
        let track = self.get_track_by_id(id).await?;
        self.download_track(track, dest_dir, cancel).await
    }

    fn supports_search(&self) -> bool {
        true
    }

    async fn download_by_search(
        &self,
        artist: &str,
        title: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult> {
        let results = self.search_track(&format!("{artist} {title}")).await?;

        // Rank search hits with the match engine rather than trusting the
        // service's ordering
        let video = VideoInfo {
            title: title.to_string(),
            artist: artist.to_string(),
            duration_secs: 0.0,
            thumbnail_url: None,
            isrc: None,
        };
        let candidates: Vec<AudioCandidate> =
            results.iter().map(|t| t.as_candidate()).collect();

        let chosen = match_video_to_audio(&video, &candidates, &MatchOptions::default())
            .map_err(|no_match| {
                anyhow::Error::new(super::SearchNoMatch {
                    best_score: no_match.diagnostics.best_score,
                    candidates: no_match.candidates.into_iter().map(|s| s.candidate).collect(),
                })
            })?;

        let chosen_id = chosen.candidate.url.rsplit('/').next().unwrap_or_default();
        let track = results
            .into_iter()
            .find(|t| t.id.to_string() == chosen_id)
            .context("matched candidate vanished from results")?;

        debug!(track_id = track.id, "Search match selected");
        self.download_track(track, dest_dir, cancel).await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TidalTrackEnvelope {
    data: TidalTrack,
}

#[derive(Debug, Deserialize)]
struct TidalSearchEnvelope {
    #[serde(default)]
    data: Option<TidalItems>,
    #[serde(default)]
    tracks: Option<TidalItems>,
}

impl TidalSearchEnvelope {
    /// The API answers with either `data.items` or `tracks.items`
    fn items(self) -> Vec<TidalTrack> {
        self.data
            .and_then(|d| if d.items.is_empty() { None } else { Some(d.items) })
            .or_else(|| self.tracks.map(|t| t.items))
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct TidalItems {
    #[serde(default)]
    items: Vec<TidalTrack>,
}

#[derive(Debug, Deserialize)]
struct TidalTrack {
    id: u64,
    title: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    isrc: Option<String>,
    #[serde(default)]
    artist: Option<TidalName>,
    #[serde(default)]
    artists: Vec<TidalName>,
    #[serde(default)]
    album: Option<TidalAlbum>,
    #[serde(rename = "audioQuality", default)]
    audio_quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TidalName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TidalAlbum {
    title: String,
}

impl TidalTrack {
    /// The primary artist name, falling back to the artists list when the
    /// singular field is empty
    fn artist_name(&self) -> String {
        self.artist
            .as_ref()
            .map(|a| a.name.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| self.artists.first().map(|a| a.name.clone()))
            .unwrap_or_default()
    }

    fn into_info(self) -> AudioTrackInfo {
        let artist = self.artist_name();
        AudioTrackInfo {
            id: self.id.to_string(),
            title: self.title,
            artist,
            album: self.album.map(|a| a.title).unwrap_or_default(),
            duration_secs: self.duration,
            isrc: self.isrc,
            platform: "tidal".to_string(),
            cover_url: None,
            quality: self.audio_quality.or(Some("lossless".to_string())),
        }
    }

    fn as_candidate(&self) -> AudioCandidate {
        AudioCandidate {
            platform: "tidal".to_string(),
            url: format!("https://tidal.com/browse/track/{}", self.id),
            title: self.title.clone(),
            artist: self.artist_name(),
            album: self.album.as_ref().map(|a| a.title.clone()),
            duration_secs: if self.duration > 0.0 {
                Some(self.duration)
            } else {
                None
            },
            isrc: self.isrc.clone(),
            quality: Some("lossless".to_string()),
            priority: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TidalStreamEnvelope {
    data: TidalStreamData,
}

#[derive(Debug, Deserialize)]
struct TidalStreamData {
    #[serde(default)]
    manifest: String,
}

#[derive(Debug, Deserialize)]
struct TidalManifest {
    #[serde(rename = "mimeType", default)]
    #[allow(dead_code)]
    mime_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    codecs: String,
    #[serde(default)]
    urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tidal_id() {
        assert_eq!(
            extract_tidal_id("https://tidal.com/browse/track/12345").unwrap(),
            12345
        );
        assert_eq!(
            extract_tidal_id("https://listen.tidal.com/track/99999").unwrap(),
            99999
        );
        assert_eq!(extract_tidal_id("tidal:track:42").unwrap(), 42);
        assert_eq!(
            extract_tidal_id("https://api.example.com/track/777").unwrap(),
            777
        );
        assert!(extract_tidal_id("https://tidal.com/browse/album/123").is_err());
        assert!(extract_tidal_id("").is_err());
    }

    #[test]
    fn test_search_envelope_both_shapes() {
        let data_shape: TidalSearchEnvelope = serde_json::from_str(
            r#"{"data": {"items": [{"id": 1, "title": "A"}]}}"#,
        )
        .unwrap();
        assert_eq!(data_shape.items().len(), 1);

        let tracks_shape: TidalSearchEnvelope = serde_json::from_str(
            r#"{"tracks": {"items": [{"id": 2, "title": "B"}, {"id": 3, "title": "C"}]}}"#,
        )
        .unwrap();
        assert_eq!(tracks_shape.items().len(), 2);

        let empty: TidalSearchEnvelope =
            serde_json::from_str(r#"{"data":{"items":[]},"tracks":{"items":[]}}"#).unwrap();
        assert!(empty.items().is_empty());
    }

    #[test]
    fn test_artist_fallback_to_artists_list() {
        let track: TidalTrack = serde_json::from_str(
            r#"{
                "id": 1,
                "title": "Song",
                "artist": {"name": ""},
                "artists": [{"name": "Real Artist"}],
                "album": {"title": "Album"}
            }"#,
        )
        .unwrap();
        assert_eq!(track.into_info().artist, "Real Artist");
    }

    #[test]
    fn test_manifest_decoding() {
        let manifest = serde_json::json!({
            "mimeType": "audio/flac",
            "codecs": "flac",
            "urls": ["https://cdn.example.com/stream.flac"]
        });
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&manifest).unwrap());
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .unwrap();
        let parsed: TidalManifest = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(parsed.urls, vec!["https://cdn.example.com/stream.flac"]);
    }
}
