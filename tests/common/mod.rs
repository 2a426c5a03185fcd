//! Shared test fixtures: scripted collaborators and queue construction

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vidflac::media::naming::TrackMetadata;
use vidflac::queue::item::{ItemStatus, QueueItem, VideoInfo};
use vidflac::services::audio::{
    AudioDownloadResult, AudioDownloadService, AudioTrackInfo,
};
use vidflac::services::ffmpeg::{Chapter, MediaInfo, Muxer};
use vidflac::services::lyrics::{Lyrics, LyricsProvider};
use vidflac::services::resolver::{LinkResolver, ResolvedLinks};
use vidflac::services::{ArtworkFetcher, FileIndex, VideoProvider};
use vidflac::{Collaborators, Config, Queue};

// ---------------------------------------------------------------------------
// Video provider
// ---------------------------------------------------------------------------

pub struct MockVideo {
    pub info: VideoInfo,
    pub fail_download: bool,
    pub downloads: AtomicUsize,
}

impl MockVideo {
    pub fn ok(info: VideoInfo) -> Arc<Self> {
        Arc::new(Self {
            info,
            fail_download: false,
            downloads: AtomicUsize::new(0),
        })
    }

    pub fn video_unavailable(info: VideoInfo) -> Arc<Self> {
        Arc::new(Self {
            info,
            fail_download: true,
            downloads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl VideoProvider for MockVideo {
    async fn fetch_metadata(&self, _video_id: &str) -> Result<VideoInfo> {
        Ok(self.info.clone())
    }

    async fn download(
        &self,
        _video_id: &str,
        _quality: &str,
        dest_dir: &Path,
        _cookies_browser: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_download {
            bail!("HTTP Error 403: Forbidden");
        }
        let path = dest_dir.join("video.mkv");
        tokio::fs::write(&path, b"mkv-bytes").await?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Muxer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockMuxer {
    pub fail_mux: bool,
    pub extractions: AtomicUsize,
}

#[async_trait]
impl Muxer for MockMuxer {
    async fn mux_video_with_audio(
        &self,
        _video_path: &Path,
        _audio_path: &Path,
        output_path: &Path,
        _metadata: &TrackMetadata,
        _cover_path: Option<&Path>,
        _chapters: &[Chapter],
        _cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if self.fail_mux {
            bail!("ffmpeg exited with 1: invalid stream");
        }
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, b"muxed-container").await?;
        Ok(output_path.to_path_buf())
    }

    async fn create_flac_with_metadata(
        &self,
        _audio_path: &Path,
        output_path: &Path,
        _metadata: &TrackMetadata,
        _cover_path: Option<&Path>,
        _cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if self.fail_mux {
            bail!("ffmpeg exited with 1: invalid stream");
        }
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, b"flac-container").await?;
        Ok(output_path.to_path_buf())
    }

    async fn extract_audio_stream(
        &self,
        _video_path: &Path,
        audio_out_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(audio_out_path, b"extracted-audio").await?;
        Ok(())
    }

    async fn embed_metadata_tag(
        &self,
        _path: &Path,
        _key: &str,
        _value: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Ok(())
    }

    async fn media_info(&self, _path: &Path) -> Result<MediaInfo> {
        Ok(MediaInfo::default())
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct MockResolver {
    pub links: ResolvedLinks,
}

impl MockResolver {
    pub fn with(links: ResolvedLinks) -> Arc<Self> {
        Arc::new(Self { links })
    }

    pub fn tidal_only() -> Arc<Self> {
        Self::with(ResolvedLinks {
            tidal_url: Some("https://tidal.com/browse/track/1".to_string()),
            ..Default::default()
        })
    }

    pub fn amazon_only() -> Arc<Self> {
        Self::with(ResolvedLinks {
            amazon_url: Some("https://music.amazon.com/albums/B01".to_string()),
            ..Default::default()
        })
    }

    pub fn nothing() -> Arc<Self> {
        Self::with(ResolvedLinks::default())
    }
}

#[async_trait]
impl LinkResolver for MockResolver {
    async fn resolve(&self, _source_url: &str) -> Result<ResolvedLinks> {
        Ok(self.links.clone())
    }
}

// ---------------------------------------------------------------------------
// Audio services
// ---------------------------------------------------------------------------

pub enum AudioBehavior {
    Succeed,
    Fail,
    /// Block until cancelled, then error out
    HangUntilCancelled,
}

pub struct MockAudio {
    name: &'static str,
    behavior: AudioBehavior,
    pub downloads: AtomicUsize,
}

impl MockAudio {
    pub fn new(name: &'static str, behavior: AudioBehavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            downloads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AudioDownloadService for MockAudio {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn supports_format(&self, format: &str) -> bool {
        format == "flac"
    }

    async fn get_track_info(&self, _url: &str) -> Result<AudioTrackInfo> {
        bail!("not implemented in mock")
    }

    async fn download(
        &self,
        _url: &str,
        dest_dir: &Path,
        _format: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            AudioBehavior::Succeed => {
                let path = dest_dir.join("audio.flac");
                tokio::fs::write(&path, b"fLaC-bytes").await?;
                Ok(AudioDownloadResult {
                    file_path: path,
                    track: AudioTrackInfo::default(),
                    format: "flac".to_string(),
                    size: 10,
                })
            }
            AudioBehavior::Fail => bail!("service says no"),
            AudioBehavior::HangUntilCancelled => {
                cancel.cancelled().await;
                bail!("cancelled mid-download")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lyrics / artwork
// ---------------------------------------------------------------------------

pub struct NoLyrics;

#[async_trait]
impl LyricsProvider for NoLyrics {
    async fn fetch(&self, _artist: &str, _title: &str) -> Result<Option<Lyrics>> {
        Ok(None)
    }
}

pub struct NoArtwork;

#[async_trait]
impl ArtworkFetcher for NoArtwork {
    async fn download(&self, _url: &str, _dest: &Path) -> Result<()> {
        bail!("artwork disabled in tests")
    }
}

// ---------------------------------------------------------------------------
// Fixture assembly
// ---------------------------------------------------------------------------

pub fn bohemian_rhapsody() -> VideoInfo {
    VideoInfo {
        title: "Bohemian Rhapsody".to_string(),
        artist: "Queen".to_string(),
        duration_secs: 354.0,
        thumbnail_url: None,
        isrc: None,
    }
}

pub const VIDEO_URL: &str = "https://youtube.com/watch?v=fJ9rUzIMcZQ";

pub fn test_config(root: &Path) -> Config {
    Config {
        output_directory: root.join("library"),
        data_dir: root.join("data"),
        concurrent_downloads: 1,
        generate_nfo: false,
        embed_cover_art: false,
        lyrics_enabled: false,
        download_timeout_minutes: 1,
        ..Config::default()
    }
}

pub struct TestHarness {
    pub queue: Queue,
    pub file_index: FileIndex,
    pub root: tempfile::TempDir,
}

/// Build a queue over mocked collaborators. Workers are not started; tests
/// call `queue.start()` themselves when they want the pipeline to run.
pub fn build_queue(
    video: Arc<MockVideo>,
    resolver: Arc<MockResolver>,
    audio_services: Vec<Arc<dyn AudioDownloadService>>,
) -> TestHarness {
    build_queue_with(video, resolver, audio_services, Arc::new(MockMuxer::default()))
}

pub fn build_queue_with(
    video: Arc<MockVideo>,
    resolver: Arc<MockResolver>,
    audio_services: Vec<Arc<dyn AudioDownloadService>>,
    muxer: Arc<MockMuxer>,
) -> TestHarness {
    let root = tempfile::tempdir().expect("tempdir");
    let config = test_config(root.path());
    let file_index = FileIndex::new(&config.data_dir);

    let collaborators = Arc::new(Collaborators {
        video,
        muxer,
        resolver,
        audio_services,
        lyrics: Arc::new(NoLyrics),
        artwork: Arc::new(NoArtwork),
    });

    let queue = Queue::new(config, file_index.clone(), collaborators);
    TestHarness {
        queue,
        file_index,
        root,
    }
}

/// Poll until the item reaches a terminal state.
pub async fn wait_terminal(queue: &Queue, id: Uuid) -> QueueItem {
    for _ in 0..600 {
        if let Some(item) = queue.get_item(id) {
            if item.status.is_terminal() {
                return item;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item {id} never reached a terminal state");
}

/// Poll until the item reaches the given status.
pub async fn wait_status(queue: &Queue, id: Uuid, status: ItemStatus) -> QueueItem {
    for _ in 0..600 {
        if let Some(item) = queue.get_item(id) {
            if item.status == status {
                return item;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item {id} never reached {status:?}");
}
