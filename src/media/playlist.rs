//! .m3u8 playlist emission for completed batches

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::naming::sanitize_file_name;
use crate::queue::item::QueueItem;

/// Write an .m3u8 playlist referencing the finished items of a batch.
///
/// Items without an output path are skipped. Entry paths are relative to
/// `output_dir` so the playlist survives a library move.
pub fn generate_m3u8(items: &[QueueItem], output_dir: &Path, playlist_name: &str) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut safe_name = sanitize_file_name(playlist_name);
    if safe_name.is_empty() {
        safe_name = "playlist".to_string();
    }
    let m3u8_path = output_dir.join(format!("{safe_name}.m3u8"));

    let mut body = String::from("#EXTM3U\n");
    let mut written = 0usize;

    for item in items {
        let output_path = match &item.output_path {
            Some(p) => p,
            None => continue,
        };

        let rel = output_path
            .strip_prefix(output_dir)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| output_path.to_string_lossy().to_string());

        let duration = if item.duration_secs > 0.0 {
            item.duration_secs.round() as i64
        } else {
            -1
        };

        let track_info = if item.artist.is_empty() {
            item.title.clone()
        } else {
            format!("{} - {}", item.artist, item.title)
        };

        body.push_str(&format!("#EXTINF:{duration},{track_info}\n"));
        body.push_str(&rel);
        body.push('\n');
        written += 1;
    }

    std::fs::write(&m3u8_path, body)
        .with_context(|| format!("failed to write {}", m3u8_path.display()))?;

    info!(path = %m3u8_path.display(), entries = written, "Playlist written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::{ItemStatus, QueueItem};

    fn completed_item(title: &str, artist: &str, output: Option<&Path>) -> QueueItem {
        let mut item = QueueItem::new("https://youtube.com/watch?v=abcdefghijk".into());
        item.title = title.to_string();
        item.artist = artist.to_string();
        item.duration_secs = 200.0;
        item.status = ItemStatus::Complete;
        item.output_path = output.map(|p| p.to_path_buf());
        item
    }

    #[test]
    fn test_generate_m3u8_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("Road Trip");
        std::fs::create_dir_all(&out).unwrap();

        let items = vec![
            completed_item("Time", "Pink Floyd", Some(&out.join("01 - Pink Floyd - Time.mkv"))),
            completed_item("Skipped", "Nobody", None),
        ];

        generate_m3u8(&items, &out, "Road Trip").unwrap();

        let body = std::fs::read_to_string(out.join("Road Trip.m3u8")).unwrap();
        assert!(body.starts_with("#EXTM3U\n"));
        assert!(body.contains("#EXTINF:200,Pink Floyd - Time\n"));
        assert!(body.contains("01 - Pink Floyd - Time.mkv\n"));
        assert!(!body.contains("Skipped"));
    }

    #[test]
    fn test_generate_m3u8_empty_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        generate_m3u8(&[], dir.path(), "Empty").unwrap();
        assert!(!dir.path().join("Empty.m3u8").exists());
    }
}
