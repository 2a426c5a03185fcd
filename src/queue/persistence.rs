//! Queue durability: JSON persistence, autosave, statistics

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::item::{ItemStatus, QueueItem};
use super::Queue;

/// Serialized queue document at `<data_dir>/queue.json`
#[derive(Debug, Serialize, Deserialize)]
struct QueueState {
    items: Vec<QueueItem>,
    updated_at: DateTime<Utc>,
}

/// Aggregate counts over the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl Queue {
    fn queue_file_path(&self) -> std::path::PathBuf {
        self.config().data_dir.join("queue.json")
    }

    /// Write the full item list atomically (temp file + rename).
    pub async fn save(&self) -> Result<()> {
        let state = QueueState {
            items: self.list(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&state).context("failed to serialize queue")?;

        let path = self.queue_file_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(items = state.items.len(), "Queue saved");
        Ok(())
    }

    /// Load persisted items. Anything that was in flight when the process
    /// died is normalized back to pending so a worker picks it up again.
    pub async fn load(&self) -> Result<usize> {
        let path = self.queue_file_path();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to read queue file"),
        };

        let mut state: QueueState =
            serde_json::from_slice(&data).context("failed to parse queue file")?;

        let mut resumed = 0usize;
        for item in &mut state.items {
            if item.status.is_in_flight() {
                item.status = ItemStatus::Pending;
                item.progress = 0;
                item.stage = "Waiting... (resumed)".to_string();
                resumed += 1;
            }
        }

        let count = state.items.len();
        {
            let mut items = self.inner.items.write();
            *items = state.items;
        }
        if resumed > 0 {
            self.inner.work_available.notify_one();
        }

        info!(items = count, resumed, "Queue loaded");
        Ok(count)
    }

    /// Save on a ticker until shutdown, then once more.
    pub fn start_autosave(&self, interval: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = queue.save().await {
                            warn!(error = %e, "Queue autosave failed");
                        }
                    }
                    _ = queue.inner.shutdown.cancelled() => {
                        if let Err(e) = queue.save().await {
                            warn!(error = %e, "Final autosave failed");
                        }
                        break;
                    }
                }
            }
        });
    }

    pub fn stats(&self) -> QueueStats {
        let items = self.inner.items.read();
        let mut stats = QueueStats {
            total: items.len(),
            ..Default::default()
        };

        for item in items.iter() {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                s if s.is_in_flight() => stats.active += 1,
                ItemStatus::Complete => stats.completed += 1,
                ItemStatus::Error => stats.failed += 1,
                ItemStatus::Cancelled => stats.cancelled += 1,
                _ => {}
            }
        }

        stats
    }
}
