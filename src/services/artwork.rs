//! Poster and cover art downloading

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait ArtworkFetcher: Send + Sync {
    /// Download an image to `dest`; on failure no partial file remains.
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Plain HTTP image fetcher
pub struct HttpArtworkFetcher {
    client: reqwest::Client,
}

impl HttpArtworkFetcher {
    pub fn new(proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(60));
        if let Some(proxy) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl ArtworkFetcher for HttpArtworkFetcher {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("artwork request failed")?;

        if !response.status().is_success() {
            bail!("artwork server returned {}", response.status());
        }

        let bytes = response
            .bytes()
            .await
            .context("failed to read artwork body")?;

        if let Err(e) = tokio::fs::write(dest, &bytes).await {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e).with_context(|| format!("failed to write {}", dest.display()));
        }

        debug!(url, dest = %dest.display(), bytes = bytes.len(), "Artwork downloaded");
        Ok(())
    }
}
