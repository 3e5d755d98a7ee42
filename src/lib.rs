//! # Longform-Compositor
//!
//! Generate long videos by chaining short AI-generated clips, then stitch them
//! together with optional crossfades.
//!
//! Each segment after the first is seeded from the last frame of the most recent
//! successful segment, so the clips flow into one another. The pipeline retries
//! failed generation attempts with exponential backoff, applies a strict or
//! lenient continuation policy, reports progress over a channel, and can be
//! cancelled cooperatively.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use longform_compositor::{
//!     config::Config,
//!     generation::{GenerationRequest, SegmentGenerator, StabilityClient},
//!     pipeline::PipelineController,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::default();
//! let client = StabilityClient::new(&config.api, config.api.api_key_from_env()?)?;
//! let generator = SegmentGenerator::new(Arc::new(client), config.video.resolution());
//! let codec = config.video.codec.build(config.video.quality);
//!
//! let controller = PipelineController::new(generator, codec, config.pipeline_settings());
//! let request = GenerationRequest::from_prompt("a paper boat drifting downstream", &config.generation);
//! let report = controller.run(request, None, &CancellationToken::new()).await?;
//!
//! if let Some(video) = report.final_video {
//!     std::fs::write("longform.mp4", &video.bytes)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`generation`] - Request model, backend seam and the segment generator
//! - [`pipeline`] - Run state, retry policy, progress events and the controller
//! - [`video`] - Codecs, last-frame extraction and crossfade concatenation
//! - [`config`] - Configuration management
//!
//! ## Custom Backends
//!
//! Any service that can turn text into an image and an image into a clip can
//! drive the pipeline by implementing [`GenerationBackend`](generation::GenerationBackend).

pub mod config;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{CompositorError, Result},
    generation::{GenerationBackend, GenerationRequest, SegmentGenerator},
    pipeline::{PipelineController, RunReport, RunState},
    video::{Concatenator, FinalVideo, FrameExtractor},
};
