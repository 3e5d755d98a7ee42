//! # Video Processing Module
//!
//! Codecs, last-frame extraction for chaining, and crossfade concatenation.

pub mod codec;
pub mod concat;
pub mod extractor;
pub mod types;

mod apng;
mod ffmpeg;

pub use apng::ApngCodec;
pub use codec::{container_extension, is_png_stream, CodecKind, SniffingCodec, VideoCodec};
pub use concat::{Concatenator, FinalVideo};
pub use extractor::FrameExtractor;
pub use ffmpeg::FfmpegCodec;
pub use types::{ClipInfo, Frame, FrameSequence};
