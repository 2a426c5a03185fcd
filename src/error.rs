//! Pipeline error taxonomy
//!
//! Errors that surface on queue items are structured so the UI can decide
//! whether to offer a retry and what override to suggest. Internal plumbing
//! uses `anyhow`; the boundary into queue state converts to `PipelineError`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unparsable or unsupported input URL
    InvalidInput,
    /// Transient network failure or upstream 5xx
    UpstreamUnavailable,
    /// No audio source produced an acceptable match
    MatchFailed,
    /// All download services exhausted, extraction fallback also failed
    DownloadFailed,
    /// Mux subprocess exited non-zero
    MuxingFailed,
    /// Filesystem failure (permissions, disk full)
    IoFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::MatchFailed => "match_failed",
            ErrorKind::DownloadFailed => "download_failed",
            ErrorKind::MuxingFailed => "muxing_failed",
            ErrorKind::IoFailed => "io_failed",
        }
    }
}

/// Structured error carried on a queue item in the `error` status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_hint: Option<String>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            ErrorKind::UpstreamUnavailable
                | ErrorKind::MatchFailed
                | ErrorKind::DownloadFailed
                | ErrorKind::MuxingFailed
        );
        Self {
            kind,
            message: message.into(),
            retryable,
            override_hint: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
            .with_hint("check the URL, or supply artist/title manually")
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    pub fn match_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MatchFailed, message)
            .with_hint("correct the artist/title or supply a direct catalog URL")
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DownloadFailed, message)
    }

    pub fn muxing_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MuxingFailed, message)
    }

    pub fn io_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailed, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.override_hint = Some(hint.into());
        self
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::io_failed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_defaults() {
        assert!(!PipelineError::invalid_input("bad url").retryable);
        assert!(PipelineError::upstream("timeout").retryable);
        assert!(PipelineError::download_failed("exhausted").retryable);
        assert!(!PipelineError::io_failed("disk full").retryable);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let err = PipelineError::match_failed("no candidate cleared threshold");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"match_failed\""));
        assert!(json.contains("override_hint"));
    }

    #[test]
    fn test_display_includes_kind() {
        let err = PipelineError::muxing_failed("ffmpeg exited with 1");
        assert_eq!(err.to_string(), "muxing_failed: ffmpeg exited with 1");
    }
}
