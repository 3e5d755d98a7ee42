use std::sync::Arc;

use tracing::debug;

use crate::error::VideoError;
use crate::video::codec::VideoCodec;
use crate::video::types::Frame;

/// Pulls the final frame out of an encoded clip so the next segment can be
/// seeded from it.
#[derive(Clone)]
pub struct FrameExtractor {
    codec: Arc<dyn VideoCodec>,
}

impl FrameExtractor {
    pub fn new(codec: Arc<dyn VideoCodec>) -> Self {
        Self { codec }
    }

    /// Last decodable frame as a decoded [`Frame`]
    pub fn last_frame(&self, video: &[u8]) -> Result<Frame, VideoError> {
        if video.is_empty() {
            return Err(VideoError::decode("empty video stream"));
        }
        let frame = self.codec.last_frame(video)?;
        if frame.width() == 0 || frame.height() == 0 {
            return Err(VideoError::decode("last frame has zero size"));
        }
        Ok(frame)
    }

    /// Last decodable frame as PNG bytes, ready to upload as a seed image.
    ///
    /// Identical input always yields identical bytes.
    pub fn extract_last_frame(&self, video: &[u8]) -> Result<Vec<u8>, VideoError> {
        let frame = self.last_frame(video)?;
        debug!(
            "Extracted {}x{} seed frame via {}",
            frame.width(),
            frame.height(),
            self.codec.name()
        );
        frame.to_png_bytes()
    }
}
