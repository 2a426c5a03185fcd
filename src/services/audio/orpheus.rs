//! OrpheusDL download service (python subprocess)
//!
//! Last-resort service: shells out to the orpheusdl python module and picks
//! up whatever FLAC it drops into the scratch directory. Availability means
//! the module is importable; there is no metadata-only API.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use walkdir::WalkDir;

use super::{AudioDownloadResult, AudioDownloadService, AudioTrackInfo, ProbeCache};
use crate::services::process::run_checked;

pub struct OrpheusDlService {
    python_bin: String,
    probe: ProbeCache,
}

impl Default for OrpheusDlService {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            probe: ProbeCache::new(),
        }
    }
}

impl OrpheusDlService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest .flac under `dir`, recursively.
    fn find_downloaded_flac(dir: &Path) -> Result<PathBuf> {
        let mut newest: Option<(SystemTime, PathBuf)> = None;

        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_flac = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("flac"))
                .unwrap_or(false);
            if !is_flac {
                continue;
            }

            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                newest = Some((modified, path.to_path_buf()));
            }
        }

        newest
            .map(|(_, path)| path)
            .with_context(|| format!("no FLAC file found in {}", dir.display()))
    }
}

#[async_trait]
impl AudioDownloadService for OrpheusDlService {
    fn name(&self) -> &'static str {
        "orpheusdl"
    }

    async fn is_available(&self) -> bool {
        self.probe
            .check(|| async {
                run_checked(
                    &self.python_bin,
                    &["-c", "import orpheusdl"],
                    None,
                    &CancellationToken::new(),
                )
                .await
                .is_ok()
            })
            .await
    }

    fn supports_format(&self, format: &str) -> bool {
        format.eq_ignore_ascii_case("flac")
    }

    async fn get_track_info(&self, _url: &str) -> Result<AudioTrackInfo> {
        bail!("orpheusdl does not support metadata-only queries")
    }

    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        format: &str,
        cancel: &CancellationToken,
    ) -> Result<AudioDownloadResult> {
        if !self.supports_format(format) {
            bail!("orpheusdl only provides flac");
        }

        tokio::fs::create_dir_all(dest_dir).await?;

        run_checked(
            &self.python_bin,
            &["-m", "orpheusdl", url],
            Some(dest_dir),
            cancel,
        )
        .await
        .context("orpheusdl run failed")?;

        let dir = dest_dir.to_path_buf();
        let file_path =
            tokio::task::spawn_blocking(move || Self::find_downloaded_flac(&dir)).await??;

        let size = tokio::fs::metadata(&file_path).await.map(|m| m.len()).unwrap_or(0);
        info!(path = %file_path.display(), size, "FLAC downloaded via orpheusdl");

        // orpheusdl reports nothing machine-readable; identity comes from
        // the caller's own metadata
        Ok(AudioDownloadResult {
            file_path,
            track: AudioTrackInfo::default(),
            format: "flac".to_string(),
            size,
        })
    }
}
