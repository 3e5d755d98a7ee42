use std::io::Cursor;

use png::{BitDepth, ColorType, Decoder, Encoder, Transformations};
use tracing::debug;

use crate::error::VideoError;
use crate::video::codec::VideoCodec;
use crate::video::types::{Frame, FrameSequence};

/// Length, type, 26 data bytes and CRC
const FCTL_CHUNK_LEN: usize = 38;
/// Length, type, sequence number and CRC with no image data
const MIN_FDAT_CHUNK_LEN: usize = 16;

/// Pure Rust animated PNG codec
///
/// Lossless, dependency-free at runtime, and byte-for-byte deterministic, which
/// makes it the codec of choice for offline runs and tests. Every frame is stored
/// full-size with a `1/fps` delay.
#[derive(Debug, Default, Clone)]
pub struct ApngCodec;

impl ApngCodec {
    pub fn new() -> Self {
        Self
    }
}

impl VideoCodec for ApngCodec {
    fn name(&self) -> &str {
        "apng"
    }

    fn extension(&self) -> &str {
        "png"
    }

    fn decode(&self, bytes: &[u8]) -> Result<FrameSequence, VideoError> {
        if bytes.is_empty() {
            return Err(VideoError::decode("empty video stream"));
        }

        let mut decoder = Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
        let mut reader = decoder
            .read_info()
            .map_err(|e| VideoError::decode(format!("invalid PNG header: {}", e)))?;

        let (canvas_width, canvas_height) = {
            let info = reader.info();
            (info.width, info.height)
        };
        let frame_total = reader
            .info()
            .animation_control
            .as_ref()
            .map(|actl| actl.num_frames)
            .unwrap_or(1);

        // Every frame after the first needs at least an fcTL and an fdAT chunk
        let max_frames = bytes.len() / (FCTL_CHUNK_LEN + MIN_FDAT_CHUNK_LEN) + 1;
        if frame_total as usize > max_frames {
            return Err(VideoError::decode(format!(
                "animation declares {} frames but {} bytes can hold at most {}",
                frame_total,
                bytes.len(),
                max_frames
            )));
        }

        let mut buffer = vec![0; reader.output_buffer_size()];
        let mut frames: Vec<Frame> = Vec::new();
        let mut fps = 1.0;

        for index in 0..frame_total {
            let output = reader
                .next_frame(&mut buffer)
                .map_err(|e| VideoError::decode(format!("frame {} unreadable: {}", index, e)))?;

            let placement = reader
                .info()
                .frame_control
                .as_ref()
                .map(|fctl| (fctl.x_offset, fctl.y_offset, fctl.delay_num, fctl.delay_den));

            let rgb = to_rgb8(&buffer[..output.buffer_size()], output.color_type)?;
            let region = Frame::from_rgb_bytes(output.width, output.height, rgb)
                .ok_or_else(|| VideoError::decode(format!("frame {} has a short buffer", index)))?;

            let (x_offset, y_offset) = placement.map(|(x, y, _, _)| (x, y)).unwrap_or((0, 0));
            if index == 0 {
                if let Some((_, _, num, den)) = placement {
                    fps = fps_from_delay(num, den);
                }
            }

            let frame = if region.dimensions() == (canvas_width, canvas_height) {
                region
            } else {
                // Partial frame: paint over the previous frame at its offset
                let mut canvas = frames
                    .last()
                    .map(|f| f.as_image().clone())
                    .unwrap_or_else(|| Frame::new_filled(canvas_width, canvas_height, [0, 0, 0]).into_image());
                image::imageops::replace(&mut canvas, region.as_image(), x_offset as i64, y_offset as i64);
                Frame::new(canvas)
            };
            frames.push(frame);
        }

        if frames.is_empty() {
            return Err(VideoError::decode("animation declares zero frames"));
        }

        debug!("Decoded {} APNG frames at {:.2} fps", frames.len(), fps);
        Ok(FrameSequence::new(frames, fps))
    }

    fn encode(&self, frames: &[Frame], fps: u32) -> Result<Vec<u8>, VideoError> {
        let first = frames
            .first()
            .ok_or_else(|| VideoError::encode("no frames to encode"))?;
        let fps = u16::try_from(fps)
            .ok()
            .filter(|fps| *fps > 0)
            .ok_or_else(|| VideoError::encode(format!("unsupported frame rate {}", fps)))?;
        let (width, height) = first.dimensions();

        if let Some(bad) = frames.iter().position(|f| f.dimensions() != (width, height)) {
            return Err(VideoError::encode(format!(
                "frame {} is {}x{}, expected {}x{}",
                bad,
                frames[bad].width(),
                frames[bad].height(),
                width,
                height
            )));
        }

        let encode_err = |e: png::EncodingError| VideoError::encode(format!("APNG encoding failed: {}", e));

        let mut bytes = Vec::new();
        {
            let mut encoder = Encoder::new(&mut bytes, width, height);
            encoder.set_color(ColorType::Rgb);
            encoder.set_depth(BitDepth::Eight);
            encoder.set_animated(frames.len() as u32, 0).map_err(encode_err)?;
            encoder.set_frame_delay(1, fps).map_err(encode_err)?;

            let mut writer = encoder.write_header().map_err(encode_err)?;
            for frame in frames {
                writer.write_image_data(frame.as_image().as_raw()).map_err(encode_err)?;
            }
            writer.finish().map_err(encode_err)?;
        }

        debug!("Encoded {} frames ({}x{}) as APNG at {} fps", frames.len(), width, height, fps);
        Ok(bytes)
    }
}

/// A zero denominator means 1/100 s in APNG
fn fps_from_delay(num: u16, den: u16) -> f64 {
    let den = if den == 0 { 100.0 } else { den as f64 };
    if num == 0 {
        return 1.0;
    }
    den / num as f64
}

fn to_rgb8(data: &[u8], color: ColorType) -> Result<Vec<u8>, VideoError> {
    let rgb = match color {
        ColorType::Rgb => data.to_vec(),
        ColorType::Rgba => data.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect(),
        ColorType::Grayscale => data.iter().flat_map(|&g| [g, g, g]).collect(),
        ColorType::GrayscaleAlpha => data.chunks_exact(2).flat_map(|p| [p[0], p[0], p[0]]).collect(),
        ColorType::Indexed => {
            return Err(VideoError::decode("indexed color survived palette expansion"));
        }
    };
    Ok(rgb)
}
