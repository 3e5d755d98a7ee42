use std::io::Cursor;

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ColorType, ImageBuffer, ImageEncoder, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::VideoError;

/// Represents a single video frame
///
/// A thin wrapper around an RGB image buffer. Frames are what codecs decode into,
/// what the concatenator blends, and what the extractor turns into seed images.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_fn(width, height, |_, _| Rgb(color));
        Self { buffer }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Get a pixel at the given coordinates (returns RGB array)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    pub fn into_image(self) -> RgbImage {
        self.buffer
    }

    /// Create a frame from raw RGB bytes
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self { buffer })
    }

    /// Decode any supported still image (PNG, JPEG) into a frame
    pub fn from_image_bytes(bytes: &[u8]) -> Result<Self, VideoError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| VideoError::decode(format!("unreadable image: {}", e)))?;
        Ok(Self::new(image.to_rgb8()))
    }

    /// Encode the frame as PNG. The encoder settings are fixed, so identical
    /// frames always produce identical bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, VideoError> {
        let mut bytes = Vec::new();
        PngEncoder::new(Cursor::new(&mut bytes))
            .write_image(
                self.buffer.as_raw(),
                self.width(),
                self.height(),
                ColorType::Rgb8,
            )
            .map_err(|e| VideoError::encode(format!("PNG encoding failed: {}", e)))?;
        Ok(bytes)
    }

    /// Resize to exactly `width` x `height` (no-op when already that size)
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Frame::new(image::imageops::resize(&self.buffer, width, height, FilterType::Lanczos3))
    }

    /// Linear blend: `self * (1 - t) + other * t`, rounded per channel.
    ///
    /// `t` is clamped to `[0, 1]`. Both frames must share dimensions.
    pub fn blend(&self, other: &Frame, t: f32) -> Result<Frame, VideoError> {
        if self.dimensions() != other.dimensions() {
            return Err(VideoError::InvalidParameters {
                details: format!(
                    "cannot blend {}x{} with {}x{}",
                    self.width(),
                    self.height(),
                    other.width(),
                    other.height()
                ),
            });
        }

        let t = t.clamp(0.0, 1.0);
        let data: Vec<u8> = self
            .buffer
            .as_raw()
            .iter()
            .zip(other.buffer.as_raw())
            .map(|(&a, &b)| (a as f32 * (1.0 - t) + b as f32 * t).round() as u8)
            .collect();

        // Same dimensions and channel count as `self`, so this cannot fail
        Frame::from_rgb_bytes(self.width(), self.height(), data).ok_or_else(|| {
            VideoError::InvalidParameters {
                details: "blend produced a mismatched buffer".to_string(),
            }
        })
    }
}

/// A decoded clip: frames in presentation order at a constant native frame rate
#[derive(Debug, Clone)]
pub struct FrameSequence {
    pub frames: Vec<Frame>,
    pub fps: f64,
}

impl FrameSequence {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        Self { frames, fps }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.fps
    }

    pub fn info(&self) -> ClipInfo {
        let (width, height) = self.frames.first().map(Frame::dimensions).unwrap_or((0, 0));
        ClipInfo {
            frame_count: self.frames.len(),
            fps: self.fps,
            duration: self.duration(),
            width,
            height,
        }
    }
}

/// Lightweight clip metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub frame_count: usize,
    pub fps: f64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}
