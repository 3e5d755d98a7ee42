use std::sync::Arc;

use tracing::debug;

use crate::error::{GenerationError, VideoError};
use crate::generation::backend::GenerationBackend;
use crate::generation::request::{GenerationRequest, SeedMode};
use crate::video::Frame;

/// Produces one short clip per call from a [`GenerationRequest`].
///
/// A text seed is first rendered to a still; either way the still is fitted to
/// the video resolution and animated with a single image-to-video call. No
/// retries happen here.
#[derive(Clone)]
pub struct SegmentGenerator {
    backend: Arc<dyn GenerationBackend>,
    resolution: (u32, u32),
}

impl SegmentGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>, resolution: (u32, u32)) -> Self {
        Self { backend, resolution }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
        request.validate()?;
        debug!("Generating segment from {}", request.describe());

        let (still, from_remote) = match request.mode {
            SeedMode::TextSeed => {
                let prompt = request.prompt.as_deref().unwrap_or_default();
                let image = self
                    .backend
                    .text_to_image(prompt, request.cfg_scale, request.seed)
                    .await?;
                (image, true)
            }
            SeedMode::ImageSeed => (request.seed_image.clone().unwrap_or_default(), false),
        };

        let fitted = self.fit_to_resolution(still, from_remote).await?;

        let video = self
            .backend
            .image_to_video(&fitted, request.motion_strength, request.cfg_scale, request.seed)
            .await?;

        if video.is_empty() {
            return Err(GenerationError::remote(None, "generation API returned an empty video"));
        }
        Ok(video)
    }

    /// Resize the seed still to the target video resolution and re-encode as PNG
    async fn fit_to_resolution(
        &self,
        image: Vec<u8>,
        from_remote: bool,
    ) -> Result<Vec<u8>, GenerationError> {
        let (width, height) = self.resolution;
        let fitted = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, VideoError> {
            let frame = Frame::from_image_bytes(&image)?;
            if frame.dimensions() == (width, height) {
                frame.to_png_bytes()
            } else {
                frame.resized(width, height).to_png_bytes()
            }
        })
        .await
        .map_err(task_failure)?;

        fitted.map_err(|e| {
            if from_remote {
                GenerationError::remote(None, format!("unreadable still from text-to-image: {}", e))
            } else {
                GenerationError::invalid(format!("seed image is not a readable image: {}", e))
            }
        })
    }
}

fn task_failure(err: tokio::task::JoinError) -> GenerationError {
    GenerationError::Internal {
        reason: format!("image fitting task failed: {}", err),
    }
}
