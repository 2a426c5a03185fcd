//! Cross-platform catalog URL resolution (song.link contract)
//!
//! Given any music or video URL, the resolver returns the equivalent track
//! URLs on each supported streaming platform. Only the data shape matters
//! here; the provider is an external collaborator.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Per-platform URLs for one logical track. Any subset may be present.
#[derive(Debug, Clone, Default)]
pub struct ResolvedLinks {
    pub tidal_url: Option<String>,
    pub qobuz_url: Option<String>,
    pub amazon_url: Option<String>,
    pub deezer_url: Option<String>,
    pub spotify_url: Option<String>,
}

impl ResolvedLinks {
    /// URL for a platform tag from `audio_source_priority`
    pub fn url_for(&self, source: &str) -> Option<&str> {
        match source {
            "tidal" => self.tidal_url.as_deref(),
            "qobuz" => self.qobuz_url.as_deref(),
            "amazon" => self.amazon_url.as_deref(),
            "deezer" => self.deezer_url.as_deref(),
            "spotify" => self.spotify_url.as_deref(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tidal_url.is_none()
            && self.qobuz_url.is_none()
            && self.amazon_url.is_none()
            && self.deezer_url.is_none()
            && self.spotify_url.is_none()
    }
}

#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, source_url: &str) -> Result<ResolvedLinks>;
}

/// song.link / Odesli API client
pub struct SongLinkResolver {
    client: reqwest::Client,
    base_url: String,
}

impl SongLinkResolver {
    pub fn new(proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(60));
        if let Some(proxy) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: "https://api.song.link/v1-alpha.1".to_string(),
        })
    }
}

#[async_trait]
impl LinkResolver for SongLinkResolver {
    async fn resolve(&self, source_url: &str) -> Result<ResolvedLinks> {
        let endpoint = format!("{}/links", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .query(&[("url", source_url)])
            .send()
            .await
            .context("song.link request failed")?;

        if !response.status().is_success() {
            bail!("song.link returned {}", response.status());
        }

        let body: SongLinkResponse = response
            .json()
            .await
            .context("failed to parse song.link response")?;

        let url_of = |platform: &str| {
            body.links_by_platform
                .get(platform)
                .map(|entry| entry.url.clone())
        };

        let links = ResolvedLinks {
            tidal_url: url_of("tidal"),
            qobuz_url: url_of("qobuz"),
            amazon_url: url_of("amazonMusic").or_else(|| url_of("amazonStore")),
            deezer_url: url_of("deezer"),
            spotify_url: url_of("spotify"),
        };

        debug!(
            source = %source_url,
            tidal = links.tidal_url.is_some(),
            qobuz = links.qobuz_url.is_some(),
            amazon = links.amazon_url.is_some(),
            deezer = links.deezer_url.is_some(),
            "Catalog links resolved"
        );
        Ok(links)
    }
}

#[derive(Debug, Deserialize)]
struct SongLinkResponse {
    #[serde(rename = "linksByPlatform", default)]
    links_by_platform: HashMap<String, PlatformLink>,
}

#[derive(Debug, Deserialize)]
struct PlatformLink {
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_known_sources() {
        let links = ResolvedLinks {
            tidal_url: Some("https://tidal.com/track/1".into()),
            deezer_url: Some("https://deezer.com/track/2".into()),
            ..Default::default()
        };
        assert_eq!(links.url_for("tidal"), Some("https://tidal.com/track/1"));
        assert_eq!(links.url_for("deezer"), Some("https://deezer.com/track/2"));
        assert_eq!(links.url_for("qobuz"), None);
        assert_eq!(links.url_for("napster"), None);
        assert!(!links.is_empty());
        assert!(ResolvedLinks::default().is_empty());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "entityUniqueId": "TIDAL_SONG::1",
            "linksByPlatform": {
                "tidal": {"url": "https://listen.tidal.com/track/77646170"},
                "amazonMusic": {"url": "https://music.amazon.com/albums/B07N"},
                "spotify": {"url": "https://open.spotify.com/track/abc"}
            }
        }"#;
        let body: SongLinkResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.links_by_platform.len(), 3);
        assert_eq!(
            body.links_by_platform.get("tidal").unwrap().url,
            "https://listen.tidal.com/track/77646170"
        );
    }
}
