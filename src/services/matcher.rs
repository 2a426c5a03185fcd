//! Match engine: scores candidate audio tracks against video metadata
//!
//! Selection is threshold-gated; when nothing clears the bar the caller gets
//! a diagnostics record with the top-scored candidates so the user can pick
//! one manually.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::text_utils::{artist_similarity, title_similarity};
use crate::queue::item::{AudioCandidate, MatchDiagnostics, VideoInfo};

/// Tunables for candidate scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Minimum combined score for a candidate to be accepted
    pub min_combined_score: f64,
    pub title_weight: f64,
    pub artist_weight: f64,
    /// Duration deltas beyond this zero out the score
    pub duration_tolerance_secs: f64,
    /// Bonus when two platforms agree on an ISRC the video side lacks
    pub isrc_boost: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_combined_score: 0.72,
            title_weight: 0.60,
            artist_weight: 0.40,
            duration_tolerance_secs: 15.0,
            isrc_boost: 0.10,
        }
    }
}

/// A candidate together with its computed score
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: AudioCandidate,
    pub score: f64,
    pub isrc_match: bool,
}

/// Returned when no candidate clears the threshold
#[derive(Debug, Clone)]
pub struct NoMatch {
    pub diagnostics: MatchDiagnostics,
    /// All scored candidates, best first, for manual selection
    pub candidates: Vec<ScoredCandidate>,
}

/// Coarse ordinal for a candidate's quality string.
/// `hi_res` > `lossless` > `320kbps` > unknown.
pub fn quality_rank(quality: Option<&str>) -> u8 {
    let q = match quality {
        Some(q) => q.to_lowercase(),
        None => return 0,
    };
    if q.contains("hi_res") || q.contains("hi-res") || q.contains("hires") {
        3
    } else if q.contains("lossless") || q.contains("flac") {
        2
    } else if q.contains("320") {
        1
    } else {
        0
    }
}

fn duration_penalty(video_secs: f64, candidate_secs: Option<f64>, tolerance: f64) -> f64 {
    match candidate_secs {
        Some(c) if video_secs > 0.0 && c > 0.0 && tolerance > 0.0 => {
            let delta = (video_secs - c).abs();
            (1.0 - delta / tolerance).max(0.0)
        }
        // Either duration unknown: leave the score unpenalized
        _ => 1.0,
    }
}

fn score_candidate(
    video: &VideoInfo,
    candidate: &AudioCandidate,
    opts: &MatchOptions,
    corroborated_isrc: bool,
) -> (f64, bool) {
    // Exact ISRC agreement identifies the recording outright
    if let (Some(vi), Some(ci)) = (&video.isrc, &candidate.isrc) {
        if !vi.is_empty() && vi == ci {
            return (1.0, true);
        }
    }

    let title_sim = title_similarity(&video.title, &candidate.title);
    let artist_sim = artist_similarity(&video.artist, &candidate.artist);

    let mut score = opts.title_weight * title_sim + opts.artist_weight * artist_sim;
    score *= duration_penalty(
        video.duration_secs,
        candidate.duration_secs,
        opts.duration_tolerance_secs,
    );

    // When the video has no ISRC but two platforms agree on one, the
    // candidate very likely is the same recording
    if video.isrc.is_none() && corroborated_isrc {
        score = (score + opts.isrc_boost).min(1.0);
    }

    (score, false)
}

/// Select the best audio candidate for a video, or report why none qualified.
pub fn match_video_to_audio(
    video: &VideoInfo,
    candidates: &[AudioCandidate],
    opts: &MatchOptions,
) -> Result<ScoredCandidate, NoMatch> {
    if candidates.is_empty() {
        return Err(NoMatch {
            diagnostics: MatchDiagnostics {
                sources_tried: Vec::new(),
                failure_reason: "no candidates discovered".to_string(),
                best_score: 0.0,
            },
            candidates: Vec::new(),
        });
    }

    // ISRCs seen on more than one candidate corroborate each other
    let corroborated = |c: &AudioCandidate| -> bool {
        match &c.isrc {
            Some(isrc) if !isrc.is_empty() => {
                candidates
                    .iter()
                    .filter(|other| other.isrc.as_deref() == Some(isrc.as_str()))
                    .count()
                    > 1
            }
            _ => false,
        }
    };

    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|c| {
            let (score, isrc_match) = score_candidate(video, c, opts, corroborated(c));
            ScoredCandidate {
                candidate: c.clone(),
                score,
                isrc_match,
            }
        })
        .collect();

    // Best score first; ties by platform priority, then by quality rank
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.candidate.priority.cmp(&b.candidate.priority))
            .then(
                quality_rank(b.candidate.quality.as_deref())
                    .cmp(&quality_rank(a.candidate.quality.as_deref())),
            )
    });

    let best = &scored[0];
    debug!(
        platform = %best.candidate.platform,
        score = format!("{:.3}", best.score),
        isrc = best.isrc_match,
        "Best audio candidate"
    );

    if best.isrc_match || best.score >= opts.min_combined_score {
        return Ok(best.clone());
    }

    let best_score = best.score;
    let top: Vec<String> = scored
        .iter()
        .take(3)
        .map(|s| {
            format!(
                "{}: {} ({:.2})",
                s.candidate.platform, s.candidate.title, s.score
            )
        })
        .collect();

    Err(NoMatch {
        diagnostics: MatchDiagnostics {
            sources_tried: top,
            failure_reason: format!(
                "best score {:.2} below threshold {:.2}",
                best_score, opts.min_combined_score
            ),
            best_score,
        },
        candidates: scored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(title: &str, artist: &str, duration: f64) -> VideoInfo {
        VideoInfo {
            title: title.to_string(),
            artist: artist.to_string(),
            duration_secs: duration,
            thumbnail_url: None,
            isrc: None,
        }
    }

    fn candidate(platform: &str, title: &str, artist: &str, priority: u32) -> AudioCandidate {
        AudioCandidate {
            platform: platform.to_string(),
            url: format!("https://{platform}.example/track/1"),
            title: title.to_string(),
            artist: artist.to_string(),
            album: None,
            duration_secs: None,
            isrc: None,
            quality: None,
            priority,
        }
    }

    #[test]
    fn test_isrc_short_circuit() {
        let mut v = video("Bohemian Rhapsody", "Queen", 354.0);
        v.isrc = Some("GBUM71029604".to_string());

        let mut far = candidate("tidal", "Some Other Song", "Somebody", 1);
        far.isrc = Some("GBUM71029604".to_string());
        let near = candidate("qobuz", "Bohemian Rhapsody", "Queen", 2);

        let result =
            match_video_to_audio(&v, &[near, far], &MatchOptions::default()).unwrap();
        assert!(result.isrc_match);
        assert_eq!(result.candidate.platform, "tidal");
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_unequal_isrcs_use_formula() {
        let mut v = video("Bohemian Rhapsody", "Queen", 354.0);
        v.isrc = Some("GBUM71029604".to_string());

        let mut c = candidate("tidal", "Bohemian Rhapsody", "Queen", 1);
        c.isrc = Some("DIFFERENT00001".to_string());
        c.duration_secs = Some(355.0);

        let result = match_video_to_audio(&v, &[c], &MatchOptions::default()).unwrap();
        assert!(!result.isrc_match);
        // Formula score with a one-second duration penalty, not the 1.0 short-circuit
        assert!(result.score < 1.0);
        assert!(result.score > 0.9);
    }

    #[test]
    fn test_metadata_match_with_noise() {
        let v = video("Bohemian Rhapsody (Official Music Video)", "Queen VEVO", 354.0);
        let mut c = candidate("tidal", "Bohemian Rhapsody", "Queen", 1);
        c.duration_secs = Some(355.0);

        let result = match_video_to_audio(&v, &[c], &MatchOptions::default()).unwrap();
        assert!(result.score >= 0.72, "got {}", result.score);
    }

    #[test]
    fn test_duration_penalty_rejects_wrong_length() {
        let v = video("Intro", "Band", 30.0);
        let mut c = candidate("tidal", "Intro", "Band", 1);
        c.duration_secs = Some(300.0);

        let err = match_video_to_audio(&v, &[c], &MatchOptions::default()).unwrap_err();
        assert_eq!(err.diagnostics.best_score, 0.0);
    }

    #[test]
    fn test_empty_candidates() {
        let v = video("Anything", "Anyone", 100.0);
        let err = match_video_to_audio(&v, &[], &MatchOptions::default()).unwrap_err();
        assert!(err.candidates.is_empty());
        assert_eq!(err.diagnostics.failure_reason, "no candidates discovered");
    }

    #[test]
    fn test_no_match_reports_top_three() {
        let v = video("Stairway to Heaven", "Led Zeppelin", 482.0);
        let cands = vec![
            candidate("tidal", "Completely Different", "Other Band", 1),
            candidate("qobuz", "Nothing Alike", "Whoever", 2),
            candidate("amazon", "Wrong Song", "Wrong Band", 3),
            candidate("deezer", "Also Wrong", "Nobody", 4),
        ];

        let err = match_video_to_audio(&v, &cands, &MatchOptions::default()).unwrap_err();
        assert_eq!(err.diagnostics.sources_tried.len(), 3);
        assert!(err.diagnostics.best_score < 0.72);
        assert_eq!(err.candidates.len(), 4);
    }

    #[test]
    fn test_tie_broken_by_priority_then_quality() {
        let v = video("Time", "Pink Floyd", 413.0);
        let mut a = candidate("qobuz", "Time", "Pink Floyd", 2);
        a.quality = Some("hi_res".to_string());
        let b = candidate("tidal", "Time", "Pink Floyd", 1);

        let result = match_video_to_audio(&v, &[a.clone(), b], &MatchOptions::default()).unwrap();
        assert_eq!(result.candidate.platform, "tidal");

        let mut c = candidate("tidal", "Time", "Pink Floyd", 1);
        c.quality = Some("320kbps".to_string());
        let mut d = candidate("amazon", "Time", "Pink Floyd", 1);
        d.quality = Some("hi_res".to_string());
        let result = match_video_to_audio(&v, &[c, d], &MatchOptions::default()).unwrap();
        assert_eq!(result.candidate.platform, "amazon");
    }

    #[test]
    fn test_corroborated_isrc_boost() {
        let v = video("Obscure Track", "Small Band", 0.0);

        let mut a = candidate("tidal", "Obscure Track Edit", "Small Band", 2);
        a.isrc = Some("USXYZ0000001".to_string());
        let mut b = candidate("deezer", "Obscure Track Edit", "Small Band", 4);
        b.isrc = Some("USXYZ0000001".to_string());
        // Same metadata, better priority, but no corroborating ISRC
        let plain = candidate("qobuz", "Obscure Track Edit", "Small Band", 1);

        let opts = MatchOptions::default();
        let all = [a, b, plain];
        let result = match_video_to_audio(&v, &all, &opts).unwrap();
        assert_eq!(result.candidate.platform, "tidal");
    }

    #[test]
    fn test_quality_rank() {
        assert_eq!(quality_rank(Some("hi_res 24-bit/96kHz")), 3);
        assert_eq!(quality_rank(Some("LOSSLESS")), 2);
        assert_eq!(quality_rank(Some("mp3 320kbps")), 1);
        assert_eq!(quality_rank(Some("whatever")), 0);
        assert_eq!(quality_rank(None), 0);
    }
}
