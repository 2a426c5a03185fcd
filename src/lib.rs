//! vidflac — music video archiver
//!
//! Pairs a downloaded music video with a lossless audio track from one of
//! several catalog services, muxes them into a single container, enriches
//! the result (cover art, lyrics, NFO), and files it under a configurable
//! naming scheme. The engine is a bounded worker pool over a durable queue
//! with structured cancellation and crash recovery.

pub mod config;
pub mod error;
pub mod media;
pub mod queue;
pub mod services;

pub use config::Config;
pub use error::{ErrorKind, PipelineError};
pub use queue::{Collaborators, EnqueueRequest, Queue, QueueEvent, QueueEventType, RetryOverride};
