use async_trait::async_trait;

use crate::error::GenerationError;

/// The external image/video generation capability
///
/// Each method is a single request/response exchange with the remote service.
/// Implementations must not retry internally; the pipeline controller owns
/// retry and backoff.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Returns the name of this backend, for logs
    fn name(&self) -> &str;

    /// Generate a still image from a prompt
    async fn text_to_image(
        &self,
        prompt: &str,
        cfg_scale: f64,
        seed: Option<u32>,
    ) -> Result<Vec<u8>, GenerationError>;

    /// Animate a still image into a short clip
    async fn image_to_video(
        &self,
        image: &[u8],
        motion_strength: f64,
        cfg_scale: f64,
        seed: Option<u32>,
    ) -> Result<Vec<u8>, GenerationError>;
}
