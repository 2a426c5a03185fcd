//! Application configuration management
//!
//! Loaded once from environment variables at startup. Pipeline runs take an
//! immutable snapshot (`Arc<Config>`) when they start, so a settings change
//! mid-run affects the next item rather than the one in flight.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Where lyrics end up once fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricsEmbedMode {
    /// Sidecar .lrc (or .txt when unsynced) next to the output file
    Lrc,
    /// Embedded into the container metadata
    Embed,
    /// Both sidecar and embedded
    Both,
}

impl FromStr for LyricsEmbedMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lrc" => Ok(LyricsEmbedMode::Lrc),
            "embed" => Ok(LyricsEmbedMode::Embed),
            "both" => Ok(LyricsEmbedMode::Both),
            other => anyhow::bail!("unknown lyrics embed mode: {other}"),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root for finalized files; platform default when unset
    pub output_directory: PathBuf,

    /// Directory for queue state, file index, and history
    pub data_dir: PathBuf,

    /// Quality hint passed to the video downloader ("best", "1080p", ...)
    pub video_quality: String,

    /// Worker pool size, clamped to 1..=5
    pub concurrent_downloads: usize,

    /// Token template for non-playlist items
    pub naming_template: String,

    /// Ordered platform tags tried by the audio cascade
    pub audio_source_priority: Vec<String>,

    /// Emit an .nfo sidecar next to finished files
    pub generate_nfo: bool,

    /// Attach cover art during the mux stage
    pub embed_cover_art: bool,

    /// Run the lyrics stage
    pub lyrics_enabled: bool,

    pub lyrics_embed_mode: LyricsEmbedMode,

    /// Outer envelope around the download and mux stages
    pub download_timeout_minutes: u64,

    /// Browser name forwarded to the video downloader for cookie access
    pub cookies_browser: Option<String>,

    /// Applied to all outbound HTTP
    pub proxy_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let output_directory = env::var("OUTPUT_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_output_directory());

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let concurrent_downloads = env::var("CONCURRENT_DOWNLOADS")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<usize>()
            .context("Invalid CONCURRENT_DOWNLOADS")?
            .clamp(1, 5);

        let audio_source_priority = env::var("AUDIO_SOURCE_PRIORITY")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| default_audio_source_priority());

        let lyrics_embed_mode = env::var("LYRICS_EMBED_MODE")
            .unwrap_or_else(|_| "lrc".to_string())
            .parse()
            .context("Invalid LYRICS_EMBED_MODE")?;

        Ok(Self {
            output_directory,
            data_dir,

            video_quality: env::var("VIDEO_QUALITY").unwrap_or_else(|_| "best".to_string()),

            concurrent_downloads,

            naming_template: env::var("NAMING_TEMPLATE")
                .unwrap_or_else(|_| "{artist} - {title}".to_string()),

            audio_source_priority,

            generate_nfo: env_flag("GENERATE_NFO", true),

            embed_cover_art: env_flag("EMBED_COVER_ART", true),

            lyrics_enabled: env_flag("LYRICS_ENABLED", true),

            lyrics_embed_mode,

            download_timeout_minutes: env::var("DOWNLOAD_TIMEOUT_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid DOWNLOAD_TIMEOUT_MINUTES")?,

            cookies_browser: env::var("COOKIES_BROWSER").ok(),

            proxy_url: env::var("PROXY_URL").ok(),
        })
    }

    /// Stage 2-4 envelope as a Duration
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_minutes.max(1) * 60)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            data_dir: default_data_dir(),
            video_quality: "best".to_string(),
            concurrent_downloads: 2,
            naming_template: "{artist} - {title}".to_string(),
            audio_source_priority: default_audio_source_priority(),
            generate_nfo: true,
            embed_cover_art: true,
            lyrics_enabled: true,
            lyrics_embed_mode: LyricsEmbedMode::Lrc,
            download_timeout_minutes: 30,
            cookies_browser: None,
            proxy_url: None,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn default_audio_source_priority() -> Vec<String> {
    ["tidal", "qobuz", "amazon", "deezer"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Platform default for finished files: `<videos>/VidFlac`, falling back to
/// `~/Videos/VidFlac`, then a relative directory.
pub fn default_output_directory() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .map(|d| d.join("VidFlac"))
        .unwrap_or_else(|| PathBuf::from("./VidFlac"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("vidflac"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrent_downloads, 2);
        assert_eq!(config.naming_template, "{artist} - {title}");
        assert_eq!(
            config.audio_source_priority,
            vec!["tidal", "qobuz", "amazon", "deezer"]
        );
        assert_eq!(config.lyrics_embed_mode, LyricsEmbedMode::Lrc);
        assert_eq!(config.download_timeout(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_lyrics_mode_parsing() {
        assert_eq!(
            "both".parse::<LyricsEmbedMode>().unwrap(),
            LyricsEmbedMode::Both
        );
        assert_eq!(
            "EMBED".parse::<LyricsEmbedMode>().unwrap(),
            LyricsEmbedMode::Embed
        );
        assert!("karaoke".parse::<LyricsEmbedMode>().is_err());
    }
}
