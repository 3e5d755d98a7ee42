use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::VideoError;
use crate::video::types::{ClipInfo, Frame, FrameSequence};
use crate::video::{ApngCodec, FfmpegCodec};

/// Core trait every video container/codec backend implements
///
/// Codecs work on in-memory byte blobs: generated clips arrive as bytes from the
/// generation API and the final video leaves as bytes for the packaging layer.
/// All methods are blocking; callers run them on `spawn_blocking`.
pub trait VideoCodec: Send + Sync {
    /// Returns the unique name of this codec
    fn name(&self) -> &str;

    /// File extension (without dot) for blobs produced by [`encode`](Self::encode)
    fn extension(&self) -> &str;

    /// Decode an encoded clip into frames at its native frame rate
    fn decode(&self, bytes: &[u8]) -> Result<FrameSequence, VideoError>;

    /// Encode frames at a constant `fps`
    fn encode(&self, frames: &[Frame], fps: u32) -> Result<Vec<u8>, VideoError>;

    /// Read clip metadata
    fn probe(&self, bytes: &[u8]) -> Result<ClipInfo, VideoError> {
        let sequence = self.decode(bytes)?;
        if sequence.is_empty() {
            return Err(VideoError::decode("clip contains no frames"));
        }
        Ok(sequence.info())
    }

    /// Decode only the final frame
    fn last_frame(&self, bytes: &[u8]) -> Result<Frame, VideoError> {
        self.decode(bytes)?
            .frames
            .pop()
            .ok_or_else(|| VideoError::decode("clip contains no frames"))
    }
}

/// PNG file signature; APNG clips start with it too
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// True when `bytes` is a PNG or APNG stream
pub fn is_png_stream(bytes: &[u8]) -> bool {
    bytes.starts_with(PNG_SIGNATURE)
}

/// File extension matching the container of an encoded clip
pub fn container_extension(bytes: &[u8]) -> &'static str {
    if is_png_stream(bytes) {
        "png"
    } else {
        "mp4"
    }
}

/// Encodes with the selected output codec but decodes by container
///
/// Inputs are not always in the output format: the generation API delivers
/// MP4 clips even when the final video is written as APNG. PNG streams go to
/// the PNG decoder and everything else to the FFmpeg decoder.
#[derive(Clone)]
pub struct SniffingCodec {
    output: Arc<dyn VideoCodec>,
    png: Arc<dyn VideoCodec>,
    other: Arc<dyn VideoCodec>,
}

impl SniffingCodec {
    pub fn new(output: Arc<dyn VideoCodec>, quality: u8) -> Self {
        Self::with_decoders(output, Arc::new(ApngCodec::new()), Arc::new(FfmpegCodec::new(quality)))
    }

    pub fn with_decoders(
        output: Arc<dyn VideoCodec>,
        png: Arc<dyn VideoCodec>,
        other: Arc<dyn VideoCodec>,
    ) -> Self {
        Self { output, png, other }
    }

    fn decoder_for(&self, bytes: &[u8]) -> &Arc<dyn VideoCodec> {
        if is_png_stream(bytes) {
            &self.png
        } else {
            &self.other
        }
    }
}

impl VideoCodec for SniffingCodec {
    fn name(&self) -> &str {
        self.output.name()
    }

    fn extension(&self) -> &str {
        self.output.extension()
    }

    fn decode(&self, bytes: &[u8]) -> Result<FrameSequence, VideoError> {
        self.decoder_for(bytes).decode(bytes)
    }

    fn encode(&self, frames: &[Frame], fps: u32) -> Result<Vec<u8>, VideoError> {
        self.output.encode(frames, fps)
    }

    fn probe(&self, bytes: &[u8]) -> Result<ClipInfo, VideoError> {
        self.decoder_for(bytes).probe(bytes)
    }

    fn last_frame(&self, bytes: &[u8]) -> Result<Frame, VideoError> {
        self.decoder_for(bytes).last_frame(bytes)
    }
}

/// Which codec backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// External `ffmpeg`/`ffprobe` binaries, MP4 output
    Ffmpeg,
    /// Pure Rust animated PNG, lossless
    Apng,
}

impl CodecKind {
    /// Instantiate the backend. `quality` (0-100) only affects lossy codecs.
    ///
    /// The result encodes in this format and decodes PNG or FFmpeg-readable
    /// input alike.
    pub fn build(self, quality: u8) -> Arc<dyn VideoCodec> {
        let output: Arc<dyn VideoCodec> = match self {
            CodecKind::Ffmpeg => Arc::new(FfmpegCodec::new(quality)),
            CodecKind::Apng => Arc::new(ApngCodec::new()),
        };
        Arc::new(SniffingCodec::new(output, quality))
    }

    /// Pick a codec from an output file name, `.png`/`.apng` meaning APNG
    pub fn for_path<P: AsRef<Path>>(path: P) -> Self {
        match path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .as_deref()
        {
            Some("png") | Some("apng") => CodecKind::Apng,
            _ => CodecKind::Ffmpeg,
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = VideoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ffmpeg" | "mp4" => Ok(CodecKind::Ffmpeg),
            "apng" | "png" => Ok(CodecKind::Apng),
            other => Err(VideoError::InvalidParameters {
                details: format!("unknown codec '{}' (expected ffmpeg or apng)", other),
            }),
        }
    }
}
