//! Durable catalog of finished artifacts, used for skip detection
//!
//! The index maps output paths to the track identity that produced them.
//! Lookups are content-based: normalized title/artist fuzzy matching, so a
//! re-request of the same track under a different filename is still found.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::text_utils::{artist_similarity, title_similarity};

/// Combined score a candidate entry must reach to count as a duplicate
const MATCH_THRESHOLD: f64 = 0.85;
/// The title similarity alone must also clear this floor
const TITLE_FLOOR: f64 = 0.80;
const TITLE_WEIGHT: f64 = 0.7;
const ARTIST_WEIGHT: f64 = 0.3;

/// Delay between an index mutation and the persisted write, so playlist
/// completions coalesce into a single save
const SAVE_COALESCE: Duration = Duration::from_secs(1);

/// File extensions the startup scan considers library artifacts
const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "webm", "flac", "m4a", "opus"];

/// One finished artifact on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIndexEntry {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub duration_secs: f64,
    pub size: u64,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileIndexState {
    entries: Vec<FileIndexEntry>,
    scanned_at: DateTime<Utc>,
}

struct IndexInner {
    entries: RwLock<HashMap<PathBuf, FileIndexEntry>>,
    index_path: PathBuf,
    save_scheduled: AtomicBool,
    scan_guard: tokio::sync::Mutex<()>,
}

/// Shared handle to the index; clones point at the same state
#[derive(Clone)]
pub struct FileIndex {
    inner: Arc<IndexInner>,
}

impl FileIndex {
    /// Create an index persisted at `<data_dir>/file_index.json`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                entries: RwLock::new(HashMap::new()),
                index_path: data_dir.join("file_index.json"),
                save_scheduled: AtomicBool::new(false),
                scan_guard: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Insert or replace the entry for a path.
    pub fn add_entry(&self, entry: FileIndexEntry) {
        self.inner.entries.write().insert(entry.path.clone(), entry);
    }

    /// Find the best existing artifact for a requested track, if any clears
    /// the similarity thresholds. `duration_secs` (when known) breaks ties
    /// toward the closest runtime, then newest entry.
    pub fn find_match(
        &self,
        title: &str,
        artist: &str,
        duration_secs: f64,
    ) -> Option<FileIndexEntry> {
        if title.is_empty() {
            return None;
        }

        let entries = self.inner.entries.read();
        let mut best: Option<(f64, &FileIndexEntry)> = None;

        for entry in entries.values() {
            let title_sim = title_similarity(title, &entry.title);
            if title_sim < TITLE_FLOOR {
                continue;
            }

            let artist_sim = if artist.is_empty() || entry.artist.is_empty() {
                // Unknown artist on either side: judge on title alone
                1.0
            } else {
                artist_similarity(artist, &entry.artist)
            };

            let score = TITLE_WEIGHT * title_sim + ARTIST_WEIGHT * artist_sim;
            if score < MATCH_THRESHOLD {
                continue;
            }

            let better = match best {
                None => true,
                Some((best_score, best_entry)) => {
                    if (score - best_score).abs() > 1e-9 {
                        score > best_score
                    } else if duration_secs > 0.0 {
                        let delta = (entry.duration_secs - duration_secs).abs();
                        let best_delta = (best_entry.duration_secs - duration_secs).abs();
                        if (delta - best_delta).abs() > 1e-9 {
                            delta < best_delta
                        } else {
                            entry.indexed_at > best_entry.indexed_at
                        }
                    } else {
                        entry.indexed_at > best_entry.indexed_at
                    }
                }
            };

            if better {
                best = Some((score, entry));
            }
        }

        best.map(|(score, entry)| {
            debug!(
                path = %entry.path.display(),
                score = format!("{:.2}", score),
                "Skip-detection hit"
            );
            entry.clone()
        })
    }

    /// Walk `root` and index every media file found. One scan runs at a
    /// time; a second call while scanning returns immediately.
    pub async fn scan(&self, root: &Path) -> Result<usize> {
        let _guard = match self.inner.scan_guard.try_lock() {
            Ok(g) => g,
            Err(_) => {
                debug!("Scan already in progress, skipping");
                return Ok(0);
            }
        };

        if !root.exists() {
            return Ok(0);
        }

        let root_str = root.display().to_string();
        let root = root.to_path_buf();
        let found = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            for dir_entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
                if !dir_entry.file_type().is_file() {
                    continue;
                }
                let path = dir_entry.path();
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase());
                if !matches!(ext.as_deref(), Some(e) if MEDIA_EXTENSIONS.contains(&e)) {
                    continue;
                }

                let (title, artist) = parse_identity_from_filename(path);
                if title.is_empty() {
                    continue;
                }
                let size = dir_entry.metadata().map(|m| m.len()).unwrap_or(0);

                found.push(FileIndexEntry {
                    path: path.to_path_buf(),
                    title,
                    artist,
                    duration_secs: 0.0,
                    size,
                    indexed_at: Utc::now(),
                });
            }
            found
        })
        .await?;

        let count = found.len();
        {
            let mut entries = self.inner.entries.write();
            for entry in found {
                entries.insert(entry.path.clone(), entry);
            }
            // Drop entries whose file vanished since the last scan
            entries.retain(|path, _| path.exists());
        }

        info!(root = %root_str, indexed = count, "Library scan complete");
        self.schedule_save();
        Ok(count)
    }

    /// Persist the index now. A missing parent directory is created; the
    /// write is atomic (temp file + rename).
    pub async fn save(&self) -> Result<()> {
        let state = {
            let entries = self.inner.entries.read();
            FileIndexState {
                entries: entries.values().cloned().collect(),
                scanned_at: Utc::now(),
            }
        };

        let json = serde_json::to_vec_pretty(&state).context("failed to serialize file index")?;

        if let Some(parent) = self.inner.index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.inner.index_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.inner.index_path).await?;

        debug!(entries = state.entries.len(), "File index saved");
        Ok(())
    }

    /// Request a save soon. Rapid successive calls collapse into at most one
    /// write per coalescing window; failures are logged, never propagated.
    pub fn schedule_save(&self) {
        if self.inner.save_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let index = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SAVE_COALESCE).await;
            index.inner.save_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = index.save().await {
                warn!(error = %e, "File index save failed");
            }
        });
    }

    /// Load the persisted index. A missing file is an empty index.
    pub async fn load(&self) -> Result<usize> {
        let data = match tokio::fs::read(&self.inner.index_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to read file index"),
        };

        let state: FileIndexState =
            serde_json::from_slice(&data).context("failed to parse file index")?;
        let count = state.entries.len();

        let mut entries = self.inner.entries.write();
        entries.clear();
        for entry in state.entries {
            entries.insert(entry.path.clone(), entry);
        }

        info!(entries = count, "File index loaded");
        Ok(count)
    }
}

/// Recover (title, artist) from a library filename.
///
/// Understands "Artist - Title.ext" and playlist-shaped
/// "NN - Artist - Title.ext"; anything else indexes the stem as title only.
fn parse_identity_from_filename(path: &Path) -> (String, String) {
    let stem = match path.file_stem().and_then(|s| s.to_str()) {
        Some(s) => s,
        None => return (String::new(), String::new()),
    };

    let parts: Vec<&str> = stem.split(" - ").collect();
    match parts.as_slice() {
        [artist, title] => (title.trim().to_string(), artist.trim().to_string()),
        [num, artist, title] if num.trim().chars().all(|c| c.is_ascii_digit()) => {
            (title.trim().to_string(), artist.trim().to_string())
        }
        [first, rest @ ..] if !rest.is_empty() => {
            (rest.join(" - ").trim().to_string(), first.trim().to_string())
        }
        _ => (stem.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, title: &str, artist: &str, duration: f64) -> FileIndexEntry {
        FileIndexEntry {
            path: PathBuf::from(path),
            title: title.to_string(),
            artist: artist.to_string(),
            duration_secs: duration,
            size: 1024,
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_identity() {
        assert_eq!(
            parse_identity_from_filename(Path::new("Queen - Bohemian Rhapsody.mkv")),
            ("Bohemian Rhapsody".to_string(), "Queen".to_string())
        );
        assert_eq!(
            parse_identity_from_filename(Path::new("03 - Pink Floyd - Time.flac")),
            ("Time".to_string(), "Pink Floyd".to_string())
        );
        assert_eq!(
            parse_identity_from_filename(Path::new("untitled.mkv")),
            ("untitled".to_string(), String::new())
        );
    }

    #[tokio::test]
    async fn test_find_match_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileIndex::new(dir.path());
        index.add_entry(entry("/m/q.mkv", "Bohemian Rhapsody", "Queen", 354.0));

        let hit = index.find_match("Bohemian Rhapsody (Official Video)", "Queen VEVO", 354.0);
        assert!(hit.is_some());

        let miss = index.find_match("Completely Different Song", "Queen", 354.0);
        assert!(miss.is_none());

        assert!(index.find_match("", "Queen", 0.0).is_none());
    }

    #[tokio::test]
    async fn test_find_match_prefers_closest_duration() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileIndex::new(dir.path());
        index.add_entry(entry("/m/long.mkv", "Echoes", "Pink Floyd", 1412.0));
        index.add_entry(entry("/m/short.mkv", "Echoes", "Pink Floyd", 986.0));

        let hit = index.find_match("Echoes", "Pink Floyd", 990.0).unwrap();
        assert_eq!(hit.path, PathBuf::from("/m/short.mkv"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileIndex::new(dir.path());
        index.add_entry(entry("/m/a.mkv", "Song A", "Artist A", 100.0));
        index.add_entry(entry("/m/b.flac", "Song B", "Artist B", 200.0));
        index.save().await.unwrap();

        let restored = FileIndex::new(dir.path());
        assert_eq!(restored.load().await.unwrap(), 2);
        assert!(restored.find_match("Song A", "Artist A", 0.0).is_some());
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileIndex::new(dir.path());
        assert_eq!(index.load().await.unwrap(), 0);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_scan_indexes_media_files() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("library");
        std::fs::create_dir_all(lib.join("Chill")).unwrap();
        std::fs::write(lib.join("Queen - Bohemian Rhapsody.mkv"), b"x").unwrap();
        std::fs::write(lib.join("Chill/01 - Pink Floyd - Time.flac"), b"x").unwrap();
        std::fs::write(lib.join("notes.txt"), b"x").unwrap();

        let index = FileIndex::new(dir.path());
        let count = index.scan(&lib).await.unwrap();
        assert_eq!(count, 2);
        assert!(index.find_match("Bohemian Rhapsody", "Queen", 0.0).is_some());
        assert!(index.find_match("Time", "Pink Floyd", 0.0).is_some());
    }

    #[tokio::test]
    async fn test_schedule_save_coalesces() {
        let dir = tempfile::tempdir().unwrap();
        let index = FileIndex::new(dir.path());
        for i in 0..20 {
            index.add_entry(entry(&format!("/m/{i}.mkv"), &format!("Song {i}"), "A", 0.0));
            index.schedule_save();
        }
        // A single debounced write lands after the coalescing window
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let restored = FileIndex::new(dir.path());
        assert_eq!(restored.load().await.unwrap(), 20);
    }
}
