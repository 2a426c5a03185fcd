//! Per-item pipeline runner
//!
//! Six stages: fetch info, skip detection, video download, audio cascade,
//! mux, enrichment, placement. The cancellation token is checked between
//! stages and the item is re-fetched from the queue so user overrides
//! applied mid-run are picked up. A cancelled runner exits without touching
//! the item; the cancel operation owns the terminal transition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::item::{AudioCandidate, ItemStatus, QueueItem, VideoInfo};
use super::Queue;
use crate::config::{Config, LyricsEmbedMode};
use crate::error::PipelineError;
use crate::media::naming::{
    generate_file_path, generate_playlist_file_path, resolve_conflict, sanitize_file_name,
    TrackMetadata,
};
use crate::media::playlist::generate_m3u8;
use crate::services::audio::{AudioSourceCascade, CascadeRequest};
use crate::services::lyrics::{save_lrc_file, save_plain_lyrics_file};
use crate::services::nfo::write_nfo;
use crate::services::{parse_video_url, FileIndexEntry};

/// Why a run ended without completing
enum RunExit {
    /// The item's token tripped; leave the status alone
    Cancelled,
    /// Report through `SetItemError`
    Failed(PipelineError),
}

type RunResult<T> = Result<T, RunExit>;

/// Removes the per-item scratch directory on every exit path.
struct TempDirGuard {
    path: PathBuf,
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Temp dir cleanup failed");
            }
        }
    }
}

fn check_cancel(cancel: &CancellationToken) -> RunResult<()> {
    if cancel.is_cancelled() {
        Err(RunExit::Cancelled)
    } else {
        Ok(())
    }
}

/// Entry point called by queue workers.
pub(crate) async fn process_item(queue: &Queue, id: Uuid, cancel: CancellationToken) {
    let result = run_pipeline(queue, id, &cancel).await;
    queue.release_cancel_handle(id);

    match result {
        Ok(()) => {}
        Err(RunExit::Cancelled) => {
            debug!(item_id = %id, "Runner exited on cancellation");
        }
        Err(RunExit::Failed(error)) => {
            queue.set_item_error(id, error);
        }
    }

    maybe_emit_playlist(queue, id).await;
}

async fn run_pipeline(queue: &Queue, id: Uuid, cancel: &CancellationToken) -> RunResult<()> {
    let config = queue.config();
    let deps = queue.inner.collaborators.clone();

    let item = match queue.get_item(id) {
        Some(item) => item,
        None => return Ok(()),
    };

    let temp_dir = std::env::temp_dir().join("vidflac").join(id.to_string());
    std::fs::create_dir_all(&temp_dir)
        .map_err(|e| RunExit::Failed(PipelineError::io_failed(format!("temp dir: {e}"))))?;
    let _temp_guard = TempDirGuard {
        path: temp_dir.clone(),
    };

    // =======================================================================
    // Stage 1: fetch video info (unless already known)
    // =======================================================================
    let video_id = parse_video_url(&item.video_url).ok();
    let video_info: VideoInfo;

    if item.title.is_empty() {
        queue.update_status(id, ItemStatus::FetchingInfo, 5, "Parsing URL...");

        let vid = video_id.clone().ok_or_else(|| {
            RunExit::Failed(PipelineError::invalid_input(format!(
                "unrecognized video URL: {}",
                item.video_url
            )))
        })?;

        check_cancel(cancel)?;
        let fetched = deps.video.fetch_metadata(&vid).await.map_err(|e| {
            RunExit::Failed(PipelineError::upstream(format!(
                "failed to fetch video info: {e}"
            )))
        })?;

        queue.update_item(id, |i| {
            i.title = fetched.title.clone();
            i.artist = fetched.artist.clone();
            i.thumbnail_url = fetched.thumbnail_url.clone();
            i.duration_secs = fetched.duration_secs;
        });
        queue.update_status(id, ItemStatus::FetchingInfo, 10, "Video info fetched");
        video_info = fetched;
    } else {
        // Info supplied by import or a previous fetch
        video_info = item.video_info();
    }

    // =======================================================================
    // Stage 1.5: skip detection against the file index
    // =======================================================================
    check_cancel(cancel)?;
    if try_skip_detection(queue, id, &config, &video_info).await? {
        return Ok(());
    }

    // Stages 2-4 share one timeout envelope
    let deadline = Instant::now() + config.download_timeout();

    // =======================================================================
    // Stage 2: download video; failure flips to audio-only
    // =======================================================================
    check_cancel(cancel)?;
    queue.update_status(id, ItemStatus::DownloadingVideo, 10, "Downloading video...");

    let mut audio_only = false;
    let mut video_path: Option<PathBuf> = None;

    match &video_id {
        Some(vid) => {
            let download = tokio::time::timeout_at(
                deadline,
                deps.video.download(
                    vid,
                    &config.video_quality,
                    &temp_dir,
                    config.cookies_browser.as_deref(),
                    cancel,
                ),
            )
            .await;

            match download {
                Ok(Ok(path)) => {
                    queue.update_item(id, |i| i.video_path = Some(path.clone()));
                    queue.update_status(id, ItemStatus::DownloadingVideo, 40, "Video downloaded");
                    video_path = Some(path);
                }
                Ok(Err(e)) => {
                    warn!(item_id = %id, error = %e, "Video download failed, falling back to audio only");
                    audio_only = true;
                }
                Err(_) => {
                    warn!(item_id = %id, "Video download timed out, falling back to audio only");
                    audio_only = true;
                }
            }
        }
        None => {
            audio_only = true;
        }
    }

    if audio_only {
        queue.update_item(id, |i| i.audio_only = true);
        queue.update_status(
            id,
            ItemStatus::DownloadingAudio,
            40,
            "Video unavailable, downloading audio only...",
        );
    }

    check_cancel(cancel)?;

    // =======================================================================
    // Stage 3: audio-source cascade, then extraction fallback
    // =======================================================================
    queue.update_status(id, ItemStatus::DownloadingAudio, 40, "Finding audio match...");

    // Re-fetch: a retry override may have set a catalog URL
    let item = queue.get_item(id).ok_or(RunExit::Cancelled)?;
    let source_url = item
        .music_url
        .clone()
        .unwrap_or_else(|| item.video_url.clone());

    let cascade = AudioSourceCascade::new(
        deps.resolver.clone(),
        deps.audio_services.clone(),
        config.audio_source_priority.clone(),
    );
    let request = CascadeRequest {
        source_url: Some(source_url.as_str()),
        video: &video_info,
        dest_dir: &temp_dir,
        format: "flac",
    };

    let cascade_outcome = tokio::time::timeout_at(deadline, cascade.run(&request, cancel)).await;

    let audio_path: PathBuf;
    match cascade_outcome {
        Ok(Ok(outcome)) => {
            audio_path = outcome.result.file_path.clone();
            queue.update_item(id, |i| {
                i.audio_source = Some(outcome.source.clone());
                i.audio_path = Some(outcome.result.file_path.clone());
            });
            queue.update_status(id, ItemStatus::DownloadingAudio, 70, "Audio downloaded");
        }
        Ok(Err(failure)) => {
            check_cancel(cancel)?;
            match &video_path {
                Some(video) => {
                    // Extraction fallback: reuse the video's embedded stream
                    queue.update_status(
                        id,
                        ItemStatus::DownloadingAudio,
                        55,
                        "Extracting audio from video...",
                    );
                    let extracted = temp_dir.join("audio.mka");
                    deps.muxer
                        .extract_audio_stream(video, &extracted, cancel)
                        .await
                        .map_err(|e| {
                            fail_with_diagnostics(
                                queue,
                                id,
                                *failure,
                                PipelineError::download_failed(format!(
                                    "all audio services failed and extraction failed: {e}"
                                )),
                            )
                        })?;

                    audio_path = extracted.clone();
                    queue.update_item(id, |i| {
                        i.audio_source = Some("extracted".to_string());
                        i.audio_path = Some(extracted.clone());
                    });
                    queue.update_status(id, ItemStatus::DownloadingAudio, 70, "Audio extracted");
                }
                None => {
                    let error = if failure.candidates.is_empty() {
                        PipelineError::download_failed(
                            "no audio source available and video unavailable",
                        )
                    } else {
                        PipelineError::match_failed("no candidate cleared the match threshold")
                    };
                    return Err(fail_with_diagnostics(queue, id, *failure, error));
                }
            }
        }
        Err(_) => {
            return Err(RunExit::Failed(PipelineError::upstream(
                "audio download timed out",
            )));
        }
    }

    check_cancel(cancel)?;

    // =======================================================================
    // Stage 4: mux (or produce a tagged FLAC when no video exists)
    // =======================================================================
    queue.update_status(id, ItemStatus::Muxing, 70, "Muxing video and audio...");

    let item = queue.get_item(id).ok_or(RunExit::Cancelled)?;
    let output_dir = output_dir_for(&config, &item);
    let metadata = TrackMetadata {
        title: video_info.title.clone(),
        artist: video_info.artist.clone(),
        album: item.album.clone(),
        year: None,
        track: item.playlist_position,
        genre: String::new(),
        thumbnail_url: video_info.thumbnail_url.clone(),
        duration_secs: video_info.duration_secs,
    };

    let extension = if audio_only { ".flac" } else { ".mkv" };
    let target = if item.playlist_position > 0 {
        generate_playlist_file_path(&metadata, &output_dir, extension)
    } else {
        generate_file_path(&metadata, &config.naming_template, &output_dir, extension)
    };

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RunExit::Failed(PipelineError::io_failed(format!("output dir: {e}")))
        })?;
    }
    let target = resolve_conflict(&target);

    // Cover art for embedding; failure just means no cover
    let cover_path = if config.embed_cover_art {
        fetch_cover(&deps, &video_info, &temp_dir).await
    } else {
        None
    };

    let stage_label = if audio_only {
        "Creating FLAC file..."
    } else {
        "Creating MKV file..."
    };
    queue.update_status(id, ItemStatus::Muxing, 80, stage_label);

    let mux_result = if audio_only {
        tokio::time::timeout_at(
            deadline,
            deps.muxer.create_flac_with_metadata(
                &audio_path,
                &target,
                &metadata,
                cover_path.as_deref(),
                cancel,
            ),
        )
        .await
    } else {
        let video = item.video_path.clone().unwrap_or_default();
        tokio::time::timeout_at(
            deadline,
            deps.muxer.mux_video_with_audio(
                &video,
                &audio_path,
                &target,
                &metadata,
                cover_path.as_deref(),
                &[],
                cancel,
            ),
        )
        .await
    };

    let output_path = match mux_result {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            check_cancel(cancel)?;
            // {:#} keeps the subprocess stderr snippet from the error chain
            return Err(RunExit::Failed(PipelineError::muxing_failed(format!(
                "{e:#}"
            ))));
        }
        Err(_) => {
            return Err(RunExit::Failed(PipelineError::upstream("mux timed out")));
        }
    };
    queue.update_status(id, ItemStatus::Muxing, 85, "Container written");

    // =======================================================================
    // Stage 4.5: lyrics (warn-only)
    // =======================================================================
    check_cancel(cancel)?;
    if config.lyrics_enabled && !video_info.artist.is_empty() && !video_info.title.is_empty() {
        queue.update_status(id, ItemStatus::Organizing, 85, "Fetching lyrics...");
        attach_lyrics(&deps, &config, &video_info, &output_path, cancel).await;
    }

    // =======================================================================
    // Stage 5: NFO and poster sidecars (warn-only)
    // =======================================================================
    check_cancel(cancel)?;
    queue.update_status(id, ItemStatus::Organizing, 90, "Organizing files...");

    if config.generate_nfo {
        let media_info = deps.muxer.media_info(&output_path).await.ok();
        let nfo_path = output_path.with_extension("nfo");
        if let Err(e) = write_nfo(&metadata, &nfo_path, media_info.as_ref()) {
            warn!(item_id = %id, error = %e, "NFO write failed");
        }
    }

    if let Some(thumbnail) = &video_info.thumbnail_url {
        let poster_path = sidecar_path(&output_path, "-poster.jpg");
        if let Err(e) = deps.artwork.download(thumbnail, &poster_path).await {
            warn!(item_id = %id, error = %e, "Poster download failed");
        }
    }
    queue.update_status(id, ItemStatus::Organizing, 95, "Finalizing...");

    // =======================================================================
    // Stage 6: index, record, complete
    // =======================================================================
    let file_size = std::fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);

    queue.inner.file_index.add_entry(FileIndexEntry {
        path: output_path.clone(),
        title: video_info.title.clone(),
        artist: video_info.artist.clone(),
        duration_secs: video_info.duration_secs,
        size: file_size,
        indexed_at: Utc::now(),
    });
    queue.inner.file_index.schedule_save();

    queue.complete_item(id, "Complete", output_path, file_size);
    Ok(())
}

/// Record cascade diagnostics on the item before reporting the failure.
fn fail_with_diagnostics(
    queue: &Queue,
    id: Uuid,
    failure: crate::services::audio::CascadeFailure,
    error: PipelineError,
) -> RunExit {
    queue.update_item(id, |i| {
        i.match_candidates = dedup_candidates(failure.candidates);
        i.match_diagnostics = Some(failure.diagnostics);
    });
    RunExit::Failed(error)
}

fn dedup_candidates(mut candidates: Vec<AudioCandidate>) -> Vec<AudioCandidate> {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.url.clone()));
    candidates
}

/// Stage 1.5: complete early from an existing library file when possible.
/// Returns true when the item was finished here.
async fn try_skip_detection(
    queue: &Queue,
    id: Uuid,
    config: &Arc<Config>,
    video_info: &VideoInfo,
) -> RunResult<bool> {
    if video_info.title.is_empty() {
        return Ok(false);
    }

    let existing = match queue.inner.file_index.find_match(
        &video_info.title,
        &video_info.artist,
        video_info.duration_secs,
    ) {
        Some(entry) => entry,
        None => return Ok(false),
    };

    queue.update_status(id, ItemStatus::Organizing, 80, "Found existing file...");

    let item = queue.get_item(id).ok_or(RunExit::Cancelled)?;
    let output_dir = output_dir_for(config, &item);

    let extension = existing
        .path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".mkv".to_string());

    let metadata = TrackMetadata {
        title: video_info.title.clone(),
        artist: video_info.artist.clone(),
        album: item.album.clone(),
        track: item.playlist_position,
        duration_secs: video_info.duration_secs,
        ..Default::default()
    };

    let target = if item.playlist_position > 0 {
        generate_playlist_file_path(&metadata, &output_dir, &extension)
    } else {
        generate_file_path(&metadata, &config.naming_template, &output_dir, &extension)
    };

    if existing.path == target {
        let size = existing.size;
        queue.complete_item(id, "Skipped (already exists)", existing.path, size);
        return Ok(true);
    }

    queue.update_status(id, ItemStatus::Organizing, 90, "Copying existing file...");
    if let Some(parent) = target.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match tokio::fs::copy(&existing.path, &target).await {
        Ok(copied) => {
            queue.inner.file_index.add_entry(FileIndexEntry {
                path: target.clone(),
                title: video_info.title.clone(),
                artist: video_info.artist.clone(),
                duration_secs: existing.duration_secs,
                size: copied,
                indexed_at: Utc::now(),
            });
            queue.inner.file_index.schedule_save();

            info!(from = %existing.path.display(), to = %target.display(), "Reused existing file");
            queue.complete_item(id, "Copied from existing", target, copied);
            Ok(true)
        }
        Err(e) => {
            // Fall through to a normal download
            warn!(error = %e, "Copy from existing failed, downloading instead");
            Ok(false)
        }
    }
}

fn output_dir_for(config: &Config, item: &QueueItem) -> PathBuf {
    let mut dir = config.output_directory.clone();
    if let Some(playlist) = &item.playlist_name {
        let folder = sanitize_file_name(playlist);
        if !folder.is_empty() {
            dir = dir.join(folder);
        }
    }
    dir
}

/// "<stem><suffix>" next to the output file
fn sidecar_path(output_path: &Path, suffix: &str) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    output_path.with_file_name(format!("{stem}{suffix}"))
}

async fn fetch_cover(
    deps: &Arc<super::Collaborators>,
    video_info: &VideoInfo,
    temp_dir: &Path,
) -> Option<PathBuf> {
    let thumbnail = video_info.thumbnail_url.as_ref()?;
    let cover_path = temp_dir.join("cover.jpg");
    match deps.artwork.download(thumbnail, &cover_path).await {
        Ok(()) => Some(cover_path),
        Err(e) => {
            warn!(error = %e, "Cover download failed, muxing without cover");
            None
        }
    }
}

/// Stage 4.5 per `lyrics_embed_mode`; every failure is a warning.
async fn attach_lyrics(
    deps: &Arc<super::Collaborators>,
    config: &Arc<Config>,
    video_info: &VideoInfo,
    output_path: &Path,
    cancel: &CancellationToken,
) {
    let lyrics = match deps.lyrics.fetch(&video_info.artist, &video_info.title).await {
        Ok(Some(lyrics)) => lyrics,
        Ok(None) => {
            debug!(title = %video_info.title, "No lyrics found");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Lyrics fetch failed");
            return;
        }
    };

    let write_sidecar = matches!(
        config.lyrics_embed_mode,
        LyricsEmbedMode::Lrc | LyricsEmbedMode::Both
    );
    let embed = matches!(
        config.lyrics_embed_mode,
        LyricsEmbedMode::Embed | LyricsEmbedMode::Both
    );

    if write_sidecar {
        let written = if lyrics.has_sync() {
            save_lrc_file(&lyrics, output_path).map(|p| p.display().to_string())
        } else if !lyrics.plain_text.is_empty() {
            save_plain_lyrics_file(&lyrics, output_path).map(|p| p.display().to_string())
        } else {
            return;
        };
        match written {
            Ok(path) => debug!(path = %path, "Lyrics sidecar written"),
            Err(e) => warn!(error = %e, "Lyrics sidecar write failed"),
        }
    }

    if embed {
        let text = lyrics
            .synced
            .clone()
            .unwrap_or_else(|| lyrics.plain_text.clone());
        if let Err(e) = deps
            .muxer
            .embed_metadata_tag(output_path, "LYRICS", &text, cancel)
            .await
        {
            warn!(error = %e, "Lyrics embed failed");
        }
    }
}

/// After the last item of a playlist reaches a terminal state, emit the
/// .m3u8 for the finished batch.
async fn maybe_emit_playlist(queue: &Queue, id: Uuid) {
    let item = match queue.get_item(id) {
        Some(item) => item,
        None => return,
    };
    let playlist_name = match &item.playlist_name {
        Some(name) => name.clone(),
        None => return,
    };

    let members: Vec<QueueItem> = queue
        .list()
        .into_iter()
        .filter(|i| i.playlist_name.as_deref() == Some(playlist_name.as_str()))
        .collect();

    if !members.iter().all(|i| i.status.is_terminal()) {
        return;
    }

    let mut completed: Vec<QueueItem> = members
        .into_iter()
        .filter(|i| i.status == ItemStatus::Complete)
        .collect();
    if completed.is_empty() {
        return;
    }
    completed.sort_by_key(|i| i.playlist_position);

    let output_dir = output_dir_for(&queue.config(), &item);
    if let Err(e) = generate_m3u8(&completed, &output_dir, &playlist_name) {
        warn!(playlist = %playlist_name, error = %e, "Playlist emission failed");
    }
}
