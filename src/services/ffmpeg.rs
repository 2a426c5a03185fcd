//! FFmpeg-based muxing, extraction, and media inspection
//!
//! Uses the command-line tools (ffmpeg, ffprobe, mkvpropedit) rather than
//! library bindings; their CLI contracts are stable and the JSON output of
//! ffprobe is well-documented. All invocations honor the item's
//! cancellation token and capture stderr for error reporting.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::process::{is_on_path, run_checked};
use crate::media::naming::TrackMetadata;

/// A chapter marker destined for the output container
#[derive(Debug, Clone)]
pub struct Chapter {
    pub title: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Summary of a finished file, used by the NFO writer
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub container: String,
    pub duration_secs: Option<f64>,
    pub video_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub audio_codec: Option<String>,
    pub sample_rate: Option<u32>,
}

/// Container assembly contract: combine streams, tag, inspect.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Mux a video file with a separate audio track into `output_path`,
    /// stream-copying both and attaching cover art / chapters when given.
    async fn mux_video_with_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        metadata: &TrackMetadata,
        cover_path: Option<&Path>,
        chapters: &[Chapter],
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;

    /// Produce a tagged lossless audio file (no video stream available).
    async fn create_flac_with_metadata(
        &self,
        audio_path: &Path,
        output_path: &Path,
        metadata: &TrackMetadata,
        cover_path: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;

    /// Copy the embedded audio stream of a video into a standalone file.
    async fn extract_audio_stream(
        &self,
        video_path: &Path,
        audio_out_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Write a single metadata tag into an existing container (re-mux).
    async fn embed_metadata_tag(
        &self,
        path: &Path,
        key: &str,
        value: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Probe a finished file for the NFO sidecar.
    async fn media_info(&self, path: &Path) -> Result<MediaInfo>;
}

/// Muxer backed by the ffmpeg/ffprobe/mkvpropedit command-line tools
pub struct FfmpegService {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl FfmpegService {
    pub fn new() -> Self {
        Self::default()
    }

    fn metadata_args(metadata: &TrackMetadata) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |key: &str, value: &str| {
            if !value.is_empty() {
                args.push("-metadata".to_string());
                args.push(format!("{key}={value}"));
            }
        };
        push("title", &metadata.title);
        push("artist", &metadata.artist);
        push("album", &metadata.album);
        if let Some(year) = metadata.year {
            push("date", &year.to_string());
        }
        if metadata.track > 0 {
            push("track", &metadata.track.to_string());
        }
        push("genre", &metadata.genre);
        args
    }

    /// Attach cover art and chapters to a finished MKV via mkvpropedit when
    /// available. Both are enrichment; failures are logged, not fatal.
    async fn decorate_mkv(
        &self,
        output_path: &Path,
        cover_path: Option<&Path>,
        chapters: &[Chapter],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !is_on_path("mkvpropedit").await {
            debug!("mkvpropedit not found, skipping attachment pass");
            return Ok(());
        }

        let output = output_path.to_string_lossy().to_string();

        if let Some(cover) = cover_path {
            let cover = cover.to_string_lossy().to_string();
            if let Err(e) = run_checked(
                "mkvpropedit",
                &[&output, "--add-attachment", &cover],
                None,
                cancel,
            )
            .await
            {
                warn!(error = %e, "Failed to attach cover art");
            }
        }

        if !chapters.is_empty() {
            let xml = chapters_xml(chapters);
            let chapters_file = output_path.with_extension("chapters.xml");
            tokio::fs::write(&chapters_file, xml).await?;
            let chapters_arg = chapters_file.to_string_lossy().to_string();
            if let Err(e) = run_checked(
                "mkvpropedit",
                &[&output, "--chapters", &chapters_arg],
                None,
                cancel,
            )
            .await
            {
                warn!(error = %e, "Failed to write chapters");
            }
            let _ = tokio::fs::remove_file(&chapters_file).await;
        }

        Ok(())
    }
}

#[async_trait]
impl Muxer for FfmpegService {
    async fn mux_video_with_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        metadata: &TrackMetadata,
        cover_path: Option<&Path>,
        chapters: &[Chapter],
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let video = video_path.to_string_lossy().to_string();
        let audio = audio_path.to_string_lossy().to_string();
        let output = output_path.to_string_lossy().to_string();

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            video,
            "-i".into(),
            audio,
            // Video from the first input, replacement audio from the second
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-c".into(),
            "copy".into(),
        ];
        args.extend(Self::metadata_args(metadata));
        args.push(output.clone());

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        run_checked(&self.ffmpeg_bin, &arg_refs, None, cancel)
            .await
            .context("mux failed")?;

        self.decorate_mkv(output_path, cover_path, chapters, cancel)
            .await?;

        info!(output = %output, "Mux complete");
        Ok(output_path.to_path_buf())
    }

    async fn create_flac_with_metadata(
        &self,
        audio_path: &Path,
        output_path: &Path,
        metadata: &TrackMetadata,
        cover_path: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let audio = audio_path.to_string_lossy().to_string();
        let output = output_path.to_string_lossy().to_string();
        let already_flac = audio_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("flac"))
            .unwrap_or(false);

        let mut args: Vec<String> = vec!["-y".into(), "-i".into(), audio];

        let cover = cover_path.map(|p| p.to_string_lossy().to_string());
        if let Some(cover) = &cover {
            args.extend(["-i".into(), cover.clone()]);
            args.extend(["-map".into(), "0:a:0".into(), "-map".into(), "1:0".into()]);
            args.extend(["-disposition:v:0".into(), "attached_pic".into()]);
        }

        if already_flac {
            args.extend(["-c:a".into(), "copy".into()]);
        } else {
            args.extend(["-c:a".into(), "flac".into()]);
        }
        if cover.is_some() {
            args.extend(["-c:v".into(), "copy".into()]);
        }

        args.extend(Self::metadata_args(metadata));
        args.push(output.clone());

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        run_checked(&self.ffmpeg_bin, &arg_refs, None, cancel)
            .await
            .context("flac creation failed")?;

        info!(output = %output, "FLAC created");
        Ok(output_path.to_path_buf())
    }

    async fn extract_audio_stream(
        &self,
        video_path: &Path,
        audio_out_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let video = video_path.to_string_lossy().to_string();
        let audio_out = audio_out_path.to_string_lossy().to_string();

        run_checked(
            &self.ffmpeg_bin,
            &["-y", "-i", &video, "-vn", "-acodec", "copy", &audio_out],
            None,
            cancel,
        )
        .await
        .context("audio extraction failed")?;
        Ok(())
    }

    async fn embed_metadata_tag(
        &self,
        path: &Path,
        key: &str,
        value: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // FFmpeg cannot edit in place; re-mux to a sibling and rename over
        let tmp = path.with_extension("tag.tmp.mkv");
        let input = path.to_string_lossy().to_string();
        let tmp_str = tmp.to_string_lossy().to_string();
        let tag = format!("{key}={value}");

        let result = run_checked(
            &self.ffmpeg_bin,
            &["-y", "-i", &input, "-c", "copy", "-metadata", &tag, &tmp_str],
            None,
            cancel,
        )
        .await;

        match result {
            Ok(_) => {
                tokio::fs::rename(&tmp, path).await?;
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e.context("metadata embed failed"))
            }
        }
    }

    async fn media_info(&self, path: &Path) -> Result<MediaInfo> {
        let input = path.to_string_lossy().to_string();
        let stdout = run_checked(
            &self.ffprobe_bin,
            &[
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                &input,
            ],
            None,
            &CancellationToken::new(),
        )
        .await
        .context("ffprobe failed")?;

        let probe: FfprobeOutput =
            serde_json::from_slice(&stdout).context("failed to parse ffprobe output")?;

        let mut info = MediaInfo {
            container: probe
                .format
                .as_ref()
                .map(|f| f.format_name.clone())
                .unwrap_or_default(),
            duration_secs: probe
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(|d| d.parse::<f64>().ok()),
            ..Default::default()
        };

        for stream in probe.streams {
            match stream.codec_type.as_deref() {
                Some("video") if info.video_codec.is_none() => {
                    info.video_codec = stream.codec_name;
                    info.width = stream.width;
                    info.height = stream.height;
                }
                Some("audio") if info.audio_codec.is_none() => {
                    info.audio_codec = stream.codec_name;
                    info.sample_rate =
                        stream.sample_rate.as_deref().and_then(|s| s.parse().ok());
                }
                _ => {}
            }
        }

        Ok(info)
    }
}

fn chapters_xml(chapters: &[Chapter]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE Chapters SYSTEM \"matroskachapters.dtd\">\n\
         <Chapters>\n  <EditionEntry>\n",
    );
    for (i, ch) in chapters.iter().enumerate() {
        let start_ns = (ch.start_secs * 1e9) as i64;
        let end_ns = (ch.end_secs * 1e9) as i64;
        xml.push_str(&format!(
            "    <ChapterAtom>\n      <ChapterUID>{}</ChapterUID>\n      \
             <ChapterTimeStart>{}</ChapterTimeStart>\n      \
             <ChapterTimeEnd>{}</ChapterTimeEnd>\n      <ChapterDisplay>\n        \
             <ChapterString>{}</ChapterString>\n        \
             <ChapterLanguage>eng</ChapterLanguage>\n      </ChapterDisplay>\n    \
             </ChapterAtom>\n",
            i + 1,
            start_ns,
            end_ns,
            xml_escape(&ch.title)
        ));
    }
    xml.push_str("  </EditionEntry>\n</Chapters>\n");
    xml
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    sample_rate: Option<String>,
}
