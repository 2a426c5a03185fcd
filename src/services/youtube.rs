//! Video URL parsing, metadata fetch, and video download (yt-dlp contract)
//!
//! The downloader is an external collaborator: we shell out to yt-dlp and
//! only depend on its stable CLI surface (-J metadata dump, format
//! selection, output template).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::process::run_checked;
use crate::queue::item::VideoInfo;

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:youtube\.com|music\.youtube\.com)/watch\?(?:.*&)?v=([A-Za-z0-9_-]{11})",
        r"youtu\.be/([A-Za-z0-9_-]{11})",
        r"youtube\.com/shorts/([A-Za-z0-9_-]{11})",
        r"youtube\.com/embed/([A-Za-z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Extract the 11-character video id from a watch URL.
pub fn parse_video_url(url: &str) -> Result<String> {
    for pattern in VIDEO_ID_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(url) {
            if let Some(id) = caps.get(1) {
                return Ok(id.as_str().to_string());
            }
        }
    }
    bail!("unrecognized video URL: {url}")
}

/// Video site contract: id parsing, metadata, download.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Fetch title/artist/duration/thumbnail for a video id.
    async fn fetch_metadata(&self, video_id: &str) -> Result<VideoInfo>;

    /// Download the video into `dest_dir` and return the file path.
    /// On error no partial file remains in `dest_dir`.
    async fn download(
        &self,
        video_id: &str,
        quality: &str,
        dest_dir: &Path,
        cookies_browser: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// yt-dlp subprocess implementation
pub struct YtDlpProvider {
    binary: String,
    proxy_url: Option<String>,
}

impl YtDlpProvider {
    pub fn new(proxy_url: Option<String>) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            proxy_url,
        }
    }

    /// Translate a quality setting into a yt-dlp format selector.
    /// The audio track gets replaced later, so only the video stream matters.
    fn format_selector(quality: &str) -> String {
        match quality.trim().to_lowercase().as_str() {
            "" | "best" => "bestvideo+bestaudio/best".to_string(),
            q => {
                let height: String = q.chars().take_while(|c| c.is_ascii_digit()).collect();
                if height.is_empty() {
                    "bestvideo+bestaudio/best".to_string()
                } else {
                    format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
                }
            }
        }
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string()];
        if let Some(proxy) = &self.proxy_url {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args
    }
}

#[async_trait]
impl VideoProvider for YtDlpProvider {
    async fn fetch_metadata(&self, video_id: &str) -> Result<VideoInfo> {
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let mut args = self.common_args();
        args.push("-J".to_string());
        args.push(url);

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let stdout = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            run_checked(&self.binary, &arg_refs, None, &CancellationToken::new()),
        )
        .await
        .map_err(|_| anyhow::anyhow!("metadata fetch timed out"))?
        .context("metadata fetch failed")?;

        let dump: YtDlpDump =
            serde_json::from_slice(&stdout).context("failed to parse yt-dlp output")?;

        let info = dump.into_video_info();
        debug!(
            title = %info.title,
            artist = %info.artist,
            duration = info.duration_secs,
            "Video metadata fetched"
        );
        Ok(info)
    }

    async fn download(
        &self,
        video_id: &str,
        quality: &str,
        dest_dir: &Path,
        cookies_browser: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let output_template = dest_dir.join("video.%(ext)s");

        let mut args = self.common_args();
        args.extend([
            "-f".to_string(),
            Self::format_selector(quality),
            "--merge-output-format".to_string(),
            "mkv".to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().to_string(),
        ]);
        if let Some(browser) = cookies_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.to_string());
        }
        args.push(url);

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let result = run_checked(&self.binary, &arg_refs, None, cancel).await;

        if let Err(e) = result {
            // The contract promises no partials on failure
            remove_partials(dest_dir).await;
            return Err(e.context("video download failed"));
        }

        let path = find_downloaded_video(dest_dir)
            .await
            .context("download reported success but no video file found")?;
        info!(path = %path.display(), "Video downloaded");
        Ok(path)
    }
}

async fn remove_partials(dest_dir: &Path) {
    if let Ok(mut entries) = tokio::fs::read_dir(dest_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("video.") {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }
}

async fn find_downloaded_video(dest_dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("video.") && !name.ends_with(".part") {
            return Ok(entry.path());
        }
    }
    bail!("no video file in {}", dest_dir.display())
}

/// The subset of the yt-dlp -J dump we consume
#[derive(Debug, Deserialize)]
struct YtDlpDump {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    /// Present for music content
    track: Option<String>,
    artist: Option<String>,
    creator: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
}

impl YtDlpDump {
    fn into_video_info(self) -> VideoInfo {
        let raw_title = self.title.unwrap_or_default();

        // Music entries carry clean track/artist tags; otherwise fall back
        // to splitting an "Artist - Title" style video title
        let (title, artist) = match (self.track, self.artist.or(self.creator)) {
            (Some(track), Some(artist)) if !track.is_empty() => (track, artist),
            (_, tagged_artist) => {
                let (split_artist, split_title) = split_artist_title(&raw_title);
                let artist = tagged_artist
                    .filter(|a| !a.is_empty())
                    .or(split_artist)
                    .or(self.uploader)
                    .or(self.channel)
                    .unwrap_or_default();
                (split_title.unwrap_or(raw_title), artist)
            }
        };

        VideoInfo {
            title,
            artist,
            duration_secs: self.duration.unwrap_or(0.0),
            thumbnail_url: self.thumbnail,
            isrc: None,
        }
    }
}

/// Split "Artist - Title" video names; returns (artist, title) when the
/// pattern is present.
fn split_artist_title(raw: &str) -> (Option<String>, Option<String>) {
    match raw.split_once(" - ") {
        Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => (
            Some(artist.trim().to_string()),
            Some(title.trim().to_string()),
        ),
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_url_variants() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?list=PL123&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ] {
            assert_eq!(parse_video_url(url).unwrap(), "dQw4w9WgXcQ", "url: {url}");
        }
    }

    #[test]
    fn test_parse_video_url_rejects_junk() {
        assert!(parse_video_url("https://example.com/watch?v=abc").is_err());
        assert!(parse_video_url("not a url at all").is_err());
        assert!(parse_video_url("").is_err());
    }

    #[test]
    fn test_format_selector() {
        assert_eq!(
            YtDlpProvider::format_selector("best"),
            "bestvideo+bestaudio/best"
        );
        assert_eq!(
            YtDlpProvider::format_selector("1080p"),
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]"
        );
        assert_eq!(
            YtDlpProvider::format_selector("720"),
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
    }

    #[test]
    fn test_dump_prefers_music_tags() {
        let dump = YtDlpDump {
            title: Some("Queen - Bohemian Rhapsody (Official Video)".into()),
            duration: Some(354.0),
            thumbnail: None,
            track: Some("Bohemian Rhapsody".into()),
            artist: Some("Queen".into()),
            creator: None,
            uploader: Some("QueenVEVO".into()),
            channel: None,
        };
        let info = dump.into_video_info();
        assert_eq!(info.title, "Bohemian Rhapsody");
        assert_eq!(info.artist, "Queen");
    }

    #[test]
    fn test_dump_splits_title_fallback() {
        let dump = YtDlpDump {
            title: Some("Rick Astley - Never Gonna Give You Up".into()),
            duration: Some(212.0),
            thumbnail: None,
            track: None,
            artist: None,
            creator: None,
            uploader: Some("Rick Astley".into()),
            channel: None,
        };
        let info = dump.into_video_info();
        assert_eq!(info.artist, "Rick Astley");
        assert_eq!(info.title, "Never Gonna Give You Up");
    }

    #[test]
    fn test_dump_uploader_last_resort() {
        let dump = YtDlpDump {
            title: Some("Untitled Performance".into()),
            duration: None,
            thumbnail: None,
            track: None,
            artist: None,
            creator: None,
            uploader: Some("Some Channel".into()),
            channel: None,
        };
        let info = dump.into_video_info();
        assert_eq!(info.title, "Untitled Performance");
        assert_eq!(info.artist, "Some Channel");
    }
}
