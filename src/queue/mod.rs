//! Download queue: authoritative item list, worker pool, event fan-out
//!
//! The queue owns the single writer lock over its items. Everything else
//! mutates items through the update primitives here, which apply under the
//! lock and publish events after releasing it. Workers claim pending items
//! in enqueue order and run the pipeline in `processor`.

pub mod history;
pub mod item;
pub mod persistence;
pub mod processor;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::PipelineError;
use crate::services::audio::AudioDownloadService;
use crate::services::{
    ArtworkFetcher, FileIndex, LinkResolver, LyricsProvider, Muxer, VideoProvider,
};
use history::History;
use item::{ItemStatus, QueueItem};

/// Capacity of the observer channel; slow subscribers drop events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event published on every externally-visible queue change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    Added,
    Updated,
    Completed,
    Error,
    Cancelled,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEvent {
    #[serde(rename = "type")]
    pub event_type: QueueEventType,
    pub item_id: Uuid,
    /// Item snapshot at publication time, where applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<QueueItem>,
}

/// External collaborators the pipeline runner drives
pub struct Collaborators {
    pub video: Arc<dyn VideoProvider>,
    pub muxer: Arc<dyn Muxer>,
    pub resolver: Arc<dyn LinkResolver>,
    pub audio_services: Vec<Arc<dyn AudioDownloadService>>,
    pub lyrics: Arc<dyn LyricsProvider>,
    pub artwork: Arc<dyn ArtworkFetcher>,
}

impl Collaborators {
    /// Production wiring: yt-dlp, ffmpeg, song.link, the three audio
    /// services, lrclib, and plain HTTP artwork fetching.
    pub fn production(config: &Config) -> anyhow::Result<Self> {
        use crate::services::audio::{
            lucida::LucidaService, orpheus::OrpheusDlService, tidal_hifi::TidalHifiService,
        };
        use crate::services::{
            FfmpegService, HttpArtworkFetcher, LrclibProvider, SongLinkResolver, YtDlpProvider,
        };

        let proxy = config.proxy_url.as_deref();
        Ok(Self {
            video: Arc::new(YtDlpProvider::new(config.proxy_url.clone())),
            muxer: Arc::new(FfmpegService::new()),
            resolver: Arc::new(SongLinkResolver::new(proxy)?),
            audio_services: vec![
                Arc::new(TidalHifiService::new(proxy)?),
                Arc::new(LucidaService::new(proxy)?),
                Arc::new(OrpheusDlService::new()),
            ],
            lyrics: Arc::new(LrclibProvider::new(proxy)?),
            artwork: Arc::new(HttpArtworkFetcher::new(proxy)?),
        })
    }
}

/// A request to enqueue a new download
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub video_url: String,
    pub music_url: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub playlist_name: Option<String>,
    pub playlist_position: u32,
}

/// Overrides applied when retrying a failed item
#[derive(Debug, Clone, Default)]
pub struct RetryOverride {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub music_url: Option<String>,
}

pub(crate) struct QueueInner {
    items: RwLock<Vec<QueueItem>>,
    events: broadcast::Sender<QueueEvent>,
    shutdown: CancellationToken,
    work_available: Notify,
    config: RwLock<Arc<Config>>,
    pub(crate) file_index: FileIndex,
    pub(crate) collaborators: Arc<Collaborators>,
    pub(crate) history: History,
}

/// Handle to the download queue; cheap to clone
#[derive(Clone)]
pub struct Queue {
    pub(crate) inner: Arc<QueueInner>,
}

impl Queue {
    pub fn new(
        config: Config,
        file_index: FileIndex,
        collaborators: Arc<Collaborators>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let history = History::new(&config.data_dir);
        if let Err(e) = history.load() {
            warn!(error = %e, "History load failed, starting empty");
        }

        Self {
            inner: Arc::new(QueueInner {
                items: RwLock::new(Vec::new()),
                events,
                shutdown: CancellationToken::new(),
                work_available: Notify::new(),
                config: RwLock::new(Arc::new(config)),
                file_index,
                collaborators,
                history,
            }),
        }
    }

    /// Spawn the worker pool. Pool size is taken from the config at startup
    /// and clamped to 1..=5.
    pub fn start(&self) {
        let workers = self.config().concurrent_downloads.clamp(1, 5);
        info!(workers, "Starting download workers");

        for worker_id in 0..workers {
            let queue = self.clone();
            tokio::spawn(async move {
                loop {
                    while let Some((id, cancel)) = queue.claim_next_pending() {
                        processor::process_item(&queue, id, cancel).await;
                    }
                    tokio::select! {
                        _ = queue.inner.work_available.notified() => {}
                        _ = queue.inner.shutdown.cancelled() => break,
                    }
                }
                debug!(worker_id, "Worker stopped");
            });
        }
    }

    /// Trip the parent cancellation token (cascades into every in-flight
    /// item) and write a final queue snapshot.
    pub async fn shutdown(&self) {
        info!("Queue shutting down");
        self.inner.shutdown.cancel();
        if let Err(e) = self.save().await {
            warn!(error = %e, "Final queue save failed");
        }
    }

    /// Immutable configuration snapshot for one pipeline run
    pub fn config(&self) -> Arc<Config> {
        self.inner.config.read().clone()
    }

    /// Swap the configuration; affects items claimed after this call.
    pub fn set_config(&self, config: Config) {
        *self.inner.config.write() = Arc::new(config);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Validate and append a new item, waking a worker.
    pub fn enqueue(&self, req: EnqueueRequest) -> Result<QueueItem, PipelineError> {
        crate::services::parse_video_url(&req.video_url)
            .map_err(|e| PipelineError::invalid_input(e.to_string()))?;

        let mut item = QueueItem::new(req.video_url);
        item.music_url = req.music_url;
        if let Some(title) = req.title {
            item.title = title;
        }
        if let Some(artist) = req.artist {
            item.artist = artist;
        }
        item.playlist_name = req.playlist_name;
        item.playlist_position = req.playlist_position;

        let snapshot = item.snapshot();
        self.inner.items.write().push(item);

        self.emit(QueueEvent {
            event_type: QueueEventType::Added,
            item_id: snapshot.id,
            item: Some(snapshot.clone()),
        });
        self.inner.work_available.notify_one();

        info!(item_id = %snapshot.id, url = %snapshot.video_url, "Item enqueued");
        Ok(snapshot)
    }

    /// Cancel an item. Idempotent; a no-op for terminal items.
    pub fn cancel(&self, id: Uuid) -> bool {
        let snapshot = {
            let mut items = self.inner.items.write();
            let item = match items.iter_mut().find(|i| i.id == id) {
                Some(item) => item,
                None => return false,
            };
            if item.status.is_terminal() {
                return false;
            }

            if let Some(token) = &item.cancel {
                token.cancel();
            }
            item.status = ItemStatus::Cancelled;
            item.stage = "Cancelled".to_string();
            item.completed_at = Some(Utc::now());
            item.snapshot()
        };

        self.emit(QueueEvent {
            event_type: QueueEventType::Cancelled,
            item_id: id,
            item: Some(snapshot),
        });
        info!(item_id = %id, "Item cancelled");
        true
    }

    /// Remove a terminal item from the queue.
    pub fn remove(&self, id: Uuid) -> Result<(), PipelineError> {
        {
            let mut items = self.inner.items.write();
            let index = items
                .iter()
                .position(|i| i.id == id)
                .ok_or_else(|| PipelineError::invalid_input(format!("no such item: {id}")))?;
            if !items[index].status.is_terminal() {
                return Err(PipelineError::invalid_input(
                    "item is still active; cancel it first",
                ));
            }
            items.remove(index);
        }

        self.emit(QueueEvent {
            event_type: QueueEventType::Removed,
            item_id: id,
            item: None,
        });
        Ok(())
    }

    /// Re-dispatch a failed item with optional overrides. The original video
    /// URL is preserved; a supplied music URL overrides the catalog URL.
    pub fn retry_with_override(
        &self,
        id: Uuid,
        overrides: RetryOverride,
    ) -> Result<QueueItem, PipelineError> {
        let snapshot = {
            let mut items = self.inner.items.write();
            let item = items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| PipelineError::invalid_input(format!("no such item: {id}")))?;
            if item.status != ItemStatus::Error {
                return Err(PipelineError::invalid_input(
                    "only failed items can be retried",
                ));
            }

            if let Some(artist) = overrides.artist {
                item.artist = artist;
            }
            if let Some(title) = overrides.title {
                item.title = title;
            }
            if let Some(music_url) = overrides.music_url {
                item.music_url = Some(music_url);
            }

            item.error = None;
            item.match_candidates = Vec::new();
            item.match_diagnostics = None;
            item.status = ItemStatus::Pending;
            item.progress = 0;
            item.stage = "Waiting... (retry)".to_string();
            item.completed_at = None;
            item.snapshot()
        };

        self.emit(QueueEvent {
            event_type: QueueEventType::Updated,
            item_id: id,
            item: Some(snapshot.clone()),
        });
        self.inner.work_available.notify_one();

        info!(item_id = %id, "Item re-queued with overrides");
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Read views
    // -----------------------------------------------------------------------

    pub fn get_item(&self, id: Uuid) -> Option<QueueItem> {
        self.inner
            .items
            .read()
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.snapshot())
    }

    pub fn list(&self) -> Vec<QueueItem> {
        self.inner.items.read().iter().map(|i| i.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.read().is_empty()
    }

    // -----------------------------------------------------------------------
    // Runner-facing mutation primitives
    // -----------------------------------------------------------------------

    /// Apply a mutation under the write lock and publish an `updated` event
    /// after releasing it. Returns the post-mutation snapshot. Terminal
    /// items are never mutated; a racing cancel wins.
    pub(crate) fn update_item<F>(&self, id: Uuid, mutate: F) -> Option<QueueItem>
    where
        F: FnOnce(&mut QueueItem),
    {
        let snapshot = {
            let mut items = self.inner.items.write();
            let item = items.iter_mut().find(|i| i.id == id)?;
            if item.status.is_terminal() {
                return None;
            }
            mutate(item);
            item.snapshot()
        };

        self.emit(QueueEvent {
            event_type: QueueEventType::Updated,
            item_id: id,
            item: Some(snapshot.clone()),
        });
        Some(snapshot)
    }

    /// Advance status/progress/stage. Progress never moves backwards, and
    /// terminal items are left untouched (a racing cancel wins).
    pub(crate) fn update_status(
        &self,
        id: Uuid,
        status: ItemStatus,
        progress: u8,
        stage: &str,
    ) -> Option<QueueItem> {
        let snapshot = {
            let mut items = self.inner.items.write();
            let item = items.iter_mut().find(|i| i.id == id)?;
            if item.status.is_terminal() {
                return None;
            }
            item.status = status;
            item.progress = item.progress.max(progress.min(100));
            item.stage = stage.to_string();
            item.snapshot()
        };

        self.emit(QueueEvent {
            event_type: QueueEventType::Updated,
            item_id: id,
            item: Some(snapshot.clone()),
        });
        Some(snapshot)
    }

    /// Transition an item into the error state and publish it. Silently
    /// ignored when a terminal transition already won.
    pub(crate) fn set_item_error(&self, id: Uuid, error: PipelineError) {
        let snapshot = {
            let mut items = self.inner.items.write();
            let item = match items.iter_mut().find(|i| i.id == id) {
                Some(item) => item,
                None => return,
            };
            if item.status.is_terminal() {
                return;
            }
            item.status = ItemStatus::Error;
            item.stage = format!("Error: {}", error.message);
            item.error = Some(error);
            item.completed_at = Some(Utc::now());
            item.snapshot()
        };

        warn!(item_id = %id, error = ?snapshot.error, "Item failed");
        if let Err(e) = self.inner.history.record(&snapshot) {
            warn!(error = %e, "History write failed");
        }
        self.emit(QueueEvent {
            event_type: QueueEventType::Error,
            item_id: id,
            item: Some(snapshot),
        });
    }

    /// Terminal success transition: set output fields, record history, and
    /// publish `completed`. A no-op when a terminal transition already won.
    pub(crate) fn complete_item(
        &self,
        id: Uuid,
        stage: &str,
        output_path: std::path::PathBuf,
        file_size: u64,
    ) -> Option<QueueItem> {
        let snapshot = {
            let mut items = self.inner.items.write();
            let item = items.iter_mut().find(|i| i.id == id)?;
            if item.status.is_terminal() {
                return None;
            }
            item.status = ItemStatus::Complete;
            item.progress = 100;
            item.stage = stage.to_string();
            item.output_path = Some(output_path);
            item.file_size = file_size;
            item.completed_at = Some(Utc::now());
            item.snapshot()
        };

        if let Err(e) = self.inner.history.record(&snapshot) {
            warn!(error = %e, "History write failed");
        }
        self.emit(QueueEvent {
            event_type: QueueEventType::Completed,
            item_id: id,
            item: Some(snapshot.clone()),
        });
        if let Some(path) = &snapshot.output_path {
            info!(item_id = %id, output = %path.display(), "Item complete");
        }
        Some(snapshot)
    }

    /// Claim the first pending item: assign a child cancellation token and
    /// atomically transition it to `fetching_info`.
    pub(crate) fn claim_next_pending(&self) -> Option<(Uuid, CancellationToken)> {
        let (id, token, snapshot) = {
            let mut items = self.inner.items.write();
            let item = items.iter_mut().find(|i| i.status == ItemStatus::Pending)?;

            let token = self.inner.shutdown.child_token();
            item.cancel = Some(token.clone());
            item.status = ItemStatus::FetchingInfo;
            item.progress = 0;
            item.stage = "Fetching video info...".to_string();
            item.started_at = Some(Utc::now());
            (item.id, token, item.snapshot())
        };

        self.emit(QueueEvent {
            event_type: QueueEventType::Updated,
            item_id: id,
            item: Some(snapshot),
        });
        Some((id, token))
    }

    /// Drop the transient cancel handle once a runner exits.
    pub(crate) fn release_cancel_handle(&self, id: Uuid) {
        let mut items = self.inner.items.write();
        if let Some(item) = items.iter_mut().find(|i| i.id == id) {
            item.cancel = None;
        }
    }

    /// Best-effort fan-out; subscribers that lag drop events.
    pub(crate) fn emit(&self, event: QueueEvent) {
        let _ = self.inner.events.send(event);
    }
}
