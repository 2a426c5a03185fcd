//! Append-only history of finished items

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::item::QueueItem;
use crate::error::PipelineError;

/// One finished (completed or failed) pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
    pub finished_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_item(item: &QueueItem) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            artist: item.artist.clone(),
            status: item.status.as_str().to_string(),
            output_path: item.output_path.clone(),
            file_size: item.file_size,
            error: item.error.clone(),
            finished_at: item.completed_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryState {
    entries: Vec<HistoryEntry>,
}

/// History log persisted at `<data_dir>/history.json`
pub struct History {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl History {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            path: data_dir.join("history.json"),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Load existing history; a missing file is an empty log.
    pub fn load(&self) -> Result<usize> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to read history"),
        };
        let state: HistoryState =
            serde_json::from_slice(&data).context("failed to parse history")?;
        let count = state.entries.len();
        *self.entries.lock() = state.entries;
        Ok(count)
    }

    /// Record a finished item and persist.
    pub fn record(&self, item: &QueueItem) -> Result<()> {
        let json = {
            let mut entries = self.entries.lock();
            entries.push(HistoryEntry::from_item(item));
            serde_json::to_vec_pretty(&HistoryState {
                entries: entries.clone(),
            })?
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(item_id = %item.id, "History entry recorded");
        Ok(())
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().clone()
    }
}
