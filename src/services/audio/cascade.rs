//! Audio-source cascade: ordered fallback across resolvers and services
//!
//! Strategy order:
//! 1. Resolve the input URL into per-platform catalog URLs
//! 2. Walk the configured platform priority; for each URL try every
//!    registered service (tidal-hifi first for tidal URLs)
//! 3. Fall back to text search on services that support it
//!
//! The extraction fallback (pulling audio out of an already-downloaded
//! video) belongs to the pipeline runner, which owns the video file.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AudioDownloadResult, AudioDownloadService, SearchNoMatch};
use crate::queue::item::{AudioCandidate, MatchDiagnostics, VideoInfo};
use crate::services::resolver::LinkResolver;

/// What the cascade needs to know about one track
pub struct CascadeRequest<'a> {
    /// Catalog URL (user override) or the original video URL
    pub source_url: Option<&'a str>,
    /// Known video metadata, drives the search fallback and match scoring
    pub video: &'a VideoInfo,
    pub dest_dir: &'a Path,
    pub format: &'a str,
}

/// A successful download plus its provenance
pub struct CascadeOutcome {
    pub result: AudioDownloadResult,
    /// Platform tag recorded on the item ("tidal", "amazon", "tidal-search")
    pub source: String,
}

/// Every strategy failed; diagnostics enumerate what was tried
pub struct CascadeFailure {
    pub diagnostics: MatchDiagnostics,
    pub candidates: Vec<AudioCandidate>,
}

pub struct AudioSourceCascade {
    resolver: Arc<dyn LinkResolver>,
    services: Vec<Arc<dyn AudioDownloadService>>,
    source_priority: Vec<String>,
}

impl AudioSourceCascade {
    pub fn new(
        resolver: Arc<dyn LinkResolver>,
        services: Vec<Arc<dyn AudioDownloadService>>,
        source_priority: Vec<String>,
    ) -> Self {
        Self {
            resolver,
            services,
            source_priority,
        }
    }

    /// Obtain a lossless audio file for the request, trying every configured
    /// strategy in order.
    pub async fn run(
        &self,
        req: &CascadeRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<CascadeOutcome, Box<CascadeFailure>> {
        let mut tried: Vec<String> = Vec::new();
        let mut candidates: Vec<AudioCandidate> = Vec::new();
        let mut best_score: f64 = 0.0;

        // Phase 1+2: catalog URLs per platform
        if let Some(source_url) = req.source_url {
            match self.resolver.resolve(source_url).await {
                Ok(links) => {
                    for source in &self.source_priority {
                        if cancel.is_cancelled() {
                            return Err(self.failure(tried, candidates, best_score, "cancelled"));
                        }

                        let url = match links.url_for(source) {
                            Some(url) => url,
                            None => continue,
                        };

                        match self
                            .try_services_for_url(source, url, req, cancel, &mut tried)
                            .await
                        {
                            Some(result) => {
                                return Ok(CascadeOutcome {
                                    result,
                                    source: source.clone(),
                                });
                            }
                            None => continue,
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Catalog URL resolution failed");
                    tried.push(format!("song.link: {e}"));
                }
            }
        }

        // Phase 3: text search on capable services
        if !req.video.artist.is_empty() && !req.video.title.is_empty() {
            for service in self.services.iter().filter(|s| s.supports_search()) {
                if cancel.is_cancelled() {
                    return Err(self.failure(tried, candidates, best_score, "cancelled"));
                }
                if !service.is_available().await {
                    tried.push(format!("search/{}: unavailable", service.name()));
                    continue;
                }

                match service
                    .download_by_search(&req.video.artist, &req.video.title, req.dest_dir, cancel)
                    .await
                {
                    Ok(result) => {
                        let platform = if result.track.platform.is_empty() {
                            service.name().to_string()
                        } else {
                            result.track.platform.clone()
                        };
                        info!(service = service.name(), "Audio found via search");
                        return Ok(CascadeOutcome {
                            result,
                            source: format!("{platform}-search"),
                        });
                    }
                    Err(e) => {
                        if let Some(no_match) = e.downcast_ref::<SearchNoMatch>() {
                            best_score = best_score.max(no_match.best_score);
                            candidates.extend(no_match.candidates.iter().cloned());
                        }
                        tried.push(format!("search/{}: {e}", service.name()));
                    }
                }
            }
        }

        Err(self.failure(
            tried,
            candidates,
            best_score,
            "all_download_attempts_failed",
        ))
    }

    /// Try each registered service against one catalog URL. tidal URLs go to
    /// tidal-hifi first; services report their own availability.
    async fn try_services_for_url(
        &self,
        source: &str,
        url: &str,
        req: &CascadeRequest<'_>,
        cancel: &CancellationToken,
        tried: &mut Vec<String>,
    ) -> Option<AudioDownloadResult> {
        let mut ordered: Vec<&Arc<dyn AudioDownloadService>> = self.services.iter().collect();
        if source == "tidal" {
            ordered.sort_by_key(|s| if s.name() == "tidal-hifi" { 0 } else { 1 });
        } else {
            ordered.retain(|s| s.name() != "tidal-hifi");
        }

        for service in ordered {
            if cancel.is_cancelled() {
                return None;
            }
            if !service.supports_format(req.format) {
                continue;
            }
            if !service.is_available().await {
                tried.push(format!("{source}/{}: unavailable", service.name()));
                continue;
            }

            debug!(source, service = service.name(), url, "Trying audio service");
            match service.download(url, req.dest_dir, req.format, cancel).await {
                Ok(result) => {
                    info!(source, service = service.name(), "Audio downloaded");
                    return Some(result);
                }
                Err(e) => {
                    warn!(source, service = service.name(), error = %e, "Service failed");
                    tried.push(format!("{source}/{}: {e}", service.name()));
                }
            }
        }

        None
    }

    fn failure(
        &self,
        tried: Vec<String>,
        candidates: Vec<AudioCandidate>,
        best_score: f64,
        reason: &str,
    ) -> Box<CascadeFailure> {
        Box::new(CascadeFailure {
            diagnostics: MatchDiagnostics {
                sources_tried: tried,
                failure_reason: reason.to_string(),
                best_score,
            },
            candidates,
        })
    }
}
