//! Lyrics fetching (lrclib contract) and sidecar writers

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Lyrics for one track; `synced` holds LRC-formatted timestamped lines.
#[derive(Debug, Clone, Default)]
pub struct Lyrics {
    pub plain_text: String,
    pub synced: Option<String>,
}

impl Lyrics {
    pub fn has_sync(&self) -> bool {
        self.synced.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[async_trait]
pub trait LyricsProvider: Send + Sync {
    /// Fetch lyrics for a track; `Ok(None)` when nothing was found.
    async fn fetch(&self, artist: &str, title: &str) -> Result<Option<Lyrics>>;
}

/// lrclib.net API client
pub struct LrclibProvider {
    client: reqwest::Client,
    base_url: String,
}

impl LrclibProvider {
    pub fn new(proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(60));
        if let Some(proxy) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: "https://lrclib.net".to_string(),
        })
    }
}

#[async_trait]
impl LyricsProvider for LrclibProvider {
    async fn fetch(&self, artist: &str, title: &str) -> Result<Option<Lyrics>> {
        let endpoint = format!("{}/api/get", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .query(&[("artist_name", artist), ("track_name", title)])
            .send()
            .await
            .context("lyrics request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(artist, title, "No lyrics found");
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("lyrics provider returned {}", response.status());
        }

        let body: LrclibResponse = response
            .json()
            .await
            .context("failed to parse lyrics response")?;

        let plain = body.plain_lyrics.unwrap_or_default();
        let synced = body.synced_lyrics.filter(|s| !s.is_empty());
        if plain.is_empty() && synced.is_none() {
            return Ok(None);
        }

        Ok(Some(Lyrics {
            plain_text: plain,
            synced,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct LrclibResponse {
    #[serde(rename = "plainLyrics")]
    plain_lyrics: Option<String>,
    #[serde(rename = "syncedLyrics")]
    synced_lyrics: Option<String>,
}

/// Write synced lyrics as a sibling .lrc of the output file.
pub fn save_lrc_file(lyrics: &Lyrics, output_path: &Path) -> Result<PathBuf> {
    let synced = lyrics
        .synced
        .as_deref()
        .context("no synced lyrics to save")?;
    let lrc_path = output_path.with_extension("lrc");
    std::fs::write(&lrc_path, synced)
        .with_context(|| format!("failed to write {}", lrc_path.display()))?;
    Ok(lrc_path)
}

/// Write plain lyrics as a sibling .txt of the output file.
pub fn save_plain_lyrics_file(lyrics: &Lyrics, output_path: &Path) -> Result<PathBuf> {
    let txt_path = output_path.with_extension("txt");
    std::fs::write(&txt_path, &lyrics.plain_text)
        .with_context(|| format!("failed to write {}", txt_path.display()))?;
    Ok(txt_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_sync() {
        assert!(!Lyrics::default().has_sync());
        let synced = Lyrics {
            plain_text: String::new(),
            synced: Some("[00:01.00] line".to_string()),
        };
        assert!(synced.has_sync());
        let empty_sync = Lyrics {
            plain_text: "words".to_string(),
            synced: Some(String::new()),
        };
        assert!(!empty_sync.has_sync());
    }

    #[test]
    fn test_sidecar_writers() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("Artist - Song.mkv");
        let lyrics = Lyrics {
            plain_text: "la la la".to_string(),
            synced: Some("[00:01.00] la la la".to_string()),
        };

        let lrc = save_lrc_file(&lyrics, &output).unwrap();
        assert_eq!(lrc, dir.path().join("Artist - Song.lrc"));
        assert_eq!(
            std::fs::read_to_string(&lrc).unwrap(),
            "[00:01.00] la la la"
        );

        let txt = save_plain_lyrics_file(&lyrics, &output).unwrap();
        assert_eq!(std::fs::read_to_string(&txt).unwrap(), "la la la");
    }

    #[test]
    fn test_save_lrc_requires_sync() {
        let dir = tempfile::tempdir().unwrap();
        let lyrics = Lyrics {
            plain_text: "words".to_string(),
            synced: None,
        };
        assert!(save_lrc_file(&lyrics, &dir.path().join("x.mkv")).is_err());
    }
}
