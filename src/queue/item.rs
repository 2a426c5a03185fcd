//! Queue item data model
//!
//! Items are created by enqueue, mutated only through the queue's update
//! primitives, and serialized as-is into `queue.json`. The cancellation
//! handle is transient and never persisted.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::PipelineError;

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    FetchingInfo,
    DownloadingVideo,
    DownloadingAudio,
    Muxing,
    Organizing,
    Complete,
    Error,
    Cancelled,
}

impl ItemStatus {
    /// Terminal states are never mutated by workers
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Complete | ItemStatus::Error | ItemStatus::Cancelled
        )
    }

    /// In-flight states are normalized to pending on load (crash recovery)
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ItemStatus::FetchingInfo
                | ItemStatus::DownloadingVideo
                | ItemStatus::DownloadingAudio
                | ItemStatus::Muxing
                | ItemStatus::Organizing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::FetchingInfo => "fetching_info",
            ItemStatus::DownloadingVideo => "downloading_video",
            ItemStatus::DownloadingAudio => "downloading_audio",
            ItemStatus::Muxing => "muxing",
            ItemStatus::Organizing => "organizing",
            ItemStatus::Complete => "complete",
            ItemStatus::Error => "error",
            ItemStatus::Cancelled => "cancelled",
        }
    }
}

/// Metadata discovered for the source video
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoInfo {
    pub title: String,
    pub artist: String,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
}

/// A music-platform track proposed as a potential audio source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioCandidate {
    pub platform: String,
    pub url: String,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Platform-level preference, lower = preferred
    pub priority: u32,
}

/// Why matching failed, for the "edit & retry" path in the UI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchDiagnostics {
    pub sources_tried: Vec<String>,
    pub failure_reason: String,
    pub best_score: f64,
}

/// A single unit of work in the download queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub video_url: String,
    /// Catalog URL override (set on retry); preferred over the video URL
    /// when resolving audio sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_url: Option<String>,

    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub duration_secs: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_name: Option<String>,
    /// 1-based position within the playlist, 0 when not a playlist item
    #[serde(default)]
    pub playlist_position: u32,

    pub status: ItemStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub stage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub audio_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_candidates: Vec<AudioCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_diagnostics: Option<MatchDiagnostics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_size: u64,

    /// Trips when this item is cancelled; assigned when a worker claims the
    /// item and dropped with it. Never serialized.
    #[serde(skip)]
    pub(crate) cancel: Option<CancellationToken>,
}

impl QueueItem {
    pub fn new(video_url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_url,
            music_url: None,
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            thumbnail_url: None,
            duration_secs: 0.0,
            playlist_name: None,
            playlist_position: 0,
            status: ItemStatus::Pending,
            progress: 0,
            stage: "Waiting...".to_string(),
            audio_source: None,
            video_path: None,
            audio_path: None,
            output_path: None,
            audio_only: false,
            error: None,
            match_candidates: Vec::new(),
            match_diagnostics: None,
            started_at: None,
            completed_at: None,
            file_size: 0,
            cancel: None,
        }
    }

    /// Copy for event payloads and read views, without the live cancel handle.
    pub(crate) fn snapshot(&self) -> QueueItem {
        let mut copy = self.clone();
        copy.cancel = None;
        copy
    }

    /// Video metadata as currently known on the item
    pub fn video_info(&self) -> VideoInfo {
        VideoInfo {
            title: self.title.clone(),
            artist: self.artist.clone(),
            duration_secs: self.duration_secs,
            thumbnail_url: self.thumbnail_url.clone(),
            isrc: None,
        }
    }
}
