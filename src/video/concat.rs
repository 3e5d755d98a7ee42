// src/video/concat.rs - Segment stitching with crossfades

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::VideoError;
use crate::video::codec::VideoCodec;
use crate::video::types::{Frame, FrameSequence};

/// Guards `floor()` against values like 28.999999999999996
const FRAME_EPSILON: f64 = 1e-9;

/// The stitched output video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalVideo {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub total_duration: f64,
    pub segment_count: usize,
    pub frame_count: usize,
    pub fps: u32,
}

/// Stitches decoded segments into one clip
///
/// Segments are resampled to the target frame rate by nearest-preceding frame
/// (sample-and-hold), resized to the first segment's dimensions, then joined
/// either with a hard cut or a linear crossfade of `overlap` frames.
#[derive(Clone)]
pub struct Concatenator {
    codec: Arc<dyn VideoCodec>,
}

impl Concatenator {
    pub fn new(codec: Arc<dyn VideoCodec>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &Arc<dyn VideoCodec> {
        &self.codec
    }

    /// Decode, blend and re-encode `segments` in order
    pub fn concatenate<B: AsRef<[u8]>>(
        &self,
        segments: &[B],
        crossfade_duration: f64,
        fps: u32,
    ) -> Result<FinalVideo, VideoError> {
        if segments.is_empty() {
            return Err(VideoError::EmptyInput);
        }
        if fps == 0 {
            return Err(VideoError::InvalidParameters {
                details: "fps must be greater than zero".to_string(),
            });
        }
        if !crossfade_duration.is_finite() || crossfade_duration < 0.0 {
            return Err(VideoError::InvalidParameters {
                details: format!("crossfade duration {} must be >= 0", crossfade_duration),
            });
        }

        info!(
            "Concatenating {} segments at {} fps (crossfade {:.2}s)",
            segments.len(),
            fps,
            crossfade_duration
        );

        let mut clips = Vec::with_capacity(segments.len());
        for (index, bytes) in segments.iter().enumerate() {
            let sequence = self.codec.decode(bytes.as_ref()).map_err(|e| {
                VideoError::decode(format!("segment {}: {}", index, e))
            })?;
            if sequence.is_empty() {
                return Err(VideoError::decode(format!("segment {} has no frames", index)));
            }
            debug!(
                "Segment {}: {} frames at {:.2} fps ({:.2}s)",
                index,
                sequence.len(),
                sequence.fps,
                sequence.duration()
            );
            clips.push(resample(&sequence, fps));
        }

        let target_size = clips[0][0].dimensions();
        let clips: Vec<Vec<Frame>> = clips
            .into_par_iter()
            .map(|frames| {
                frames
                    .into_iter()
                    .map(|f| f.resized(target_size.0, target_size.1))
                    .collect()
            })
            .collect();

        let overlap = overlap_frames(crossfade_duration, fps);
        let frames = crossfade_sequences(clips, overlap)?;
        let bytes = self.codec.encode(&frames, fps)?;

        let video = FinalVideo {
            bytes,
            total_duration: frames.len() as f64 / fps as f64,
            segment_count: segments.len(),
            frame_count: frames.len(),
            fps,
        };

        info!(
            "Concatenated {} segments into {} frames ({:.2}s, {:.1} KB)",
            video.segment_count,
            video.frame_count,
            video.total_duration,
            video.bytes.len() as f64 / 1024.0
        );
        Ok(video)
    }
}

/// Overlap window in frames: `floor(duration * fps)`, at least one frame
/// whenever a crossfade was requested.
pub fn overlap_frames(crossfade_duration: f64, fps: u32) -> usize {
    if crossfade_duration <= 0.0 {
        return 0;
    }
    ((crossfade_duration * fps as f64 + FRAME_EPSILON).floor() as usize).max(1)
}

/// Resample to `target_fps` by nearest-preceding frame.
///
/// Output length is `round(n * target / native)` (minimum 1); output frame `i`
/// shows source frame `floor(i * native / target)`.
pub fn resample(sequence: &FrameSequence, target_fps: u32) -> Vec<Frame> {
    let source_len = sequence.frames.len();
    if source_len == 0 {
        return Vec::new();
    }

    let target = target_fps as f64;
    if sequence.fps <= 0.0 || (sequence.fps - target).abs() < FRAME_EPSILON {
        return sequence.frames.clone();
    }

    let ratio = sequence.fps / target;
    let output_len = ((source_len as f64 / ratio).round() as usize).max(1);

    (0..output_len)
        .map(|i| {
            let source = ((i as f64 * ratio + FRAME_EPSILON).floor() as usize).min(source_len - 1);
            sequence.frames[source].clone()
        })
        .collect()
}

/// Join frame sequences, blending `overlap` frames at each boundary.
///
/// Within a window of length `L`, frame `j` is
/// `prev[len - L + j] * (1 - j/L) + next[j] * (j/L)`, so the window starts on the
/// outgoing clip and ends one step short of the incoming one. The window replaces
/// the raw frames, so each boundary shortens the output by `L` frames.
///
/// `L` is clamped per boundary to the frames of the outgoing clip that were not
/// already consumed by its own opening blend, and to the incoming clip's length.
/// A clip that is entirely consumed therefore hard-cuts into its successor.
pub fn crossfade_sequences(clips: Vec<Vec<Frame>>, overlap: usize) -> Result<Vec<Frame>, VideoError> {
    let mut clips = clips.into_iter();
    let mut output = match clips.next() {
        Some(first) => first,
        None => return Err(VideoError::EmptyInput),
    };
    // Raw (unblended) frames of the clip currently at the tail of `output`
    let mut tail_unblended = output.len();

    for (boundary, next) in clips.enumerate() {
        let window = overlap.min(tail_unblended).min(next.len());
        if window < overlap {
            debug!(
                "Boundary {}: crossfade clamped from {} to {} frames",
                boundary, overlap, window
            );
        }

        if window == 0 {
            tail_unblended = next.len();
            output.extend(next);
            continue;
        }

        let tail_start = output.len() - window;
        let blended = output[tail_start..]
            .par_iter()
            .zip(next[..window].par_iter())
            .enumerate()
            .map(|(j, (outgoing, incoming))| outgoing.blend(incoming, j as f32 / window as f32))
            .collect::<Result<Vec<_>, _>>()?;

        output.truncate(tail_start);
        output.extend(blended);
        tail_unblended = next.len() - window;
        output.extend(next.into_iter().skip(window));
    }

    Ok(output)
}

/// Parse a 1-based, comma-separated clip order like `"2,1,3"` into 0-based
/// indices, rejecting entries outside `1..=count`.
pub fn parse_concat_order(order: &str, count: usize) -> Result<Vec<usize>, VideoError> {
    order
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let position: usize = part.parse().map_err(|_| VideoError::InvalidParameters {
                details: format!("'{}' is not a clip number", part),
            })?;
            if position == 0 || position > count {
                return Err(VideoError::InvalidParameters {
                    details: format!("clip {} is out of range 1..={}", position, count),
                });
            }
            Ok(position - 1)
        })
        .collect::<Result<Vec<_>, _>>()
        .and_then(|indices| {
            if indices.is_empty() {
                Err(VideoError::InvalidParameters {
                    details: "order lists no clips".to_string(),
                })
            } else {
                Ok(indices)
            }
        })
}
