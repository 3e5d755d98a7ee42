// src/video/ffmpeg.rs - External FFmpeg backend (MP4/H.264)

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rayon::prelude::*;
use serde::Deserialize;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::VideoError;
use crate::video::codec::VideoCodec;
use crate::video::types::{ClipInfo, Frame, FrameSequence};

const INPUT_NAME: &str = "clip.mp4";
const FRAME_PATTERN: &str = "frame_%06d.png";

/// Video codec that shells out to `ffmpeg` and `ffprobe`
///
/// Every call works inside its own scratch directory which is removed when the
/// call returns, whether it succeeded or not.
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    quality: u8,
    video_codec: String,
}

impl FfmpegCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100),
            video_codec: "libx264".to_string(),
        }
    }

    pub fn check_ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn quality_to_crf(&self) -> u8 {
        (51 - ((self.quality as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }

    fn scratch_with_input(bytes: &[u8]) -> Result<(TempDir, PathBuf), VideoError> {
        if bytes.is_empty() {
            return Err(VideoError::decode("empty video stream"));
        }
        let scratch = TempDir::new()
            .map_err(|e| VideoError::decode(format!("cannot create scratch directory: {}", e)))?;
        let input = scratch.path().join(INPUT_NAME);
        std::fs::write(&input, bytes)
            .map_err(|e| VideoError::decode(format!("cannot stage clip: {}", e)))?;
        Ok((scratch, input))
    }

    fn ffprobe(input: &Path) -> Result<ProbeOutput, VideoError> {
        let args = [
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames:format=duration",
            "-of", "json",
        ];
        let mut cmd = Command::new("ffprobe");
        cmd.args(args).arg(input);

        let stdout = run(cmd).map_err(|reason| VideoError::decode(format!("ffprobe failed: {}", reason)))?;
        serde_json::from_slice(&stdout)
            .map_err(|e| VideoError::decode(format!("unexpected ffprobe output: {}", e)))
    }
}

impl VideoCodec for FfmpegCodec {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn extension(&self) -> &str {
        "mp4"
    }

    fn decode(&self, bytes: &[u8]) -> Result<FrameSequence, VideoError> {
        let (scratch, input) = Self::scratch_with_input(bytes)?;
        let probe = Self::ffprobe(&input)?;
        let fps = probe.fps().unwrap_or_else(|| {
            warn!("ffprobe reported no frame rate, assuming 24 fps");
            24.0
        });

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-i"])
            .arg(&input)
            .args(["-vsync", "0", "-f", "image2"])
            .arg(scratch.path().join(FRAME_PATTERN));
        run(cmd).map_err(|reason| VideoError::decode(format!("ffmpeg failed: {}", reason)))?;

        let frame_paths = collect_frame_paths(scratch.path())?;
        if frame_paths.is_empty() {
            return Err(VideoError::decode("clip contains no frames"));
        }

        let frames = frame_paths
            .par_iter()
            .map(|path| {
                image::open(path)
                    .map(|img| Frame::new(img.to_rgb8()))
                    .map_err(|e| VideoError::decode(format!("unreadable frame {}: {}", path.display(), e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Decoded {} frames at {:.3} fps via ffmpeg", frames.len(), fps);
        Ok(FrameSequence::new(frames, fps))
    }

    fn encode(&self, frames: &[Frame], fps: u32) -> Result<Vec<u8>, VideoError> {
        if frames.is_empty() {
            return Err(VideoError::encode("no frames to encode"));
        }
        if fps == 0 {
            return Err(VideoError::encode("frame rate must be positive"));
        }

        let scratch = TempDir::new()
            .map_err(|e| VideoError::encode(format!("cannot create scratch directory: {}", e)))?;

        frames.par_iter().enumerate().try_for_each(|(i, frame)| {
            let path = scratch.path().join(format!("frame_{:06}.png", i + 1));
            frame
                .as_image()
                .save(&path)
                .map_err(|e| VideoError::encode(format!("failed to save frame: {}", e)))
        })?;

        let output = scratch.path().join("output.mp4");
        let fps_arg = fps.to_string();
        let crf = self.quality_to_crf().to_string();

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-framerate", fps_arg.as_str(), "-start_number", "1", "-i"])
            .arg(scratch.path().join(FRAME_PATTERN))
            .args([
                "-c:v", self.video_codec.as_str(),
                "-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2",
                "-pix_fmt", "yuv420p",
                "-crf", crf.as_str(),
                "-r", fps_arg.as_str(),
                "-movflags", "+faststart",
                "-y",
            ])
            .arg(&output);
        run(cmd).map_err(|reason| VideoError::encode(format!("ffmpeg failed: {}", reason)))?;

        std::fs::read(&output).map_err(|e| VideoError::encode(format!("ffmpeg produced no output: {}", e)))
    }

    fn probe(&self, bytes: &[u8]) -> Result<ClipInfo, VideoError> {
        let (_scratch, input) = Self::scratch_with_input(bytes)?;
        let probe = Self::ffprobe(&input)?;
        probe.clip_info()
    }

    fn last_frame(&self, bytes: &[u8]) -> Result<Frame, VideoError> {
        let (scratch, input) = Self::scratch_with_input(bytes)?;
        let output = scratch.path().join("last.png");

        // Seek to one second before the end and keep overwriting the same image
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-sseof", "-1", "-i"])
            .arg(&input)
            .args(["-update", "1", "-y"])
            .arg(&output);
        run(cmd).map_err(|reason| VideoError::decode(format!("ffmpeg failed: {}", reason)))?;

        match std::fs::read(&output) {
            Ok(png) => Frame::from_image_bytes(&png),
            Err(_) => {
                debug!("Seek-from-end produced nothing, decoding the whole clip");
                self.decode(bytes)?
                    .frames
                    .pop()
                    .ok_or_else(|| VideoError::decode("clip contains no frames"))
            }
        }
    }
}

fn run(mut cmd: Command) -> Result<Vec<u8>, String> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("could not start process: {}", e))?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(output.stdout)
}

fn collect_frame_paths(dir: &Path) -> Result<Vec<PathBuf>, VideoError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| VideoError::decode(format!("cannot list decoded frames: {}", e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("frame_") && name.ends_with(".png"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeOutput {
    fn fps(&self) -> Option<f64> {
        let stream = self.streams.first()?;
        stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rational)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
    }

    fn clip_info(&self) -> Result<ClipInfo, VideoError> {
        let stream = self
            .streams
            .first()
            .ok_or_else(|| VideoError::decode("no video stream"))?;
        let fps = self.fps().ok_or_else(|| VideoError::decode("unknown frame rate"))?;
        let duration = self
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok());
        let frame_count = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<usize>().ok())
            .or_else(|| duration.map(|d| (d * fps).round() as usize))
            .unwrap_or(0);

        if frame_count == 0 {
            return Err(VideoError::decode("clip contains no frames"));
        }

        Ok(ClipInfo {
            frame_count,
            fps,
            duration: duration.unwrap_or(frame_count as f64 / fps),
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
        })
    }
}

/// Parse ffprobe rationals like `30000/1001`
fn parse_rational(value: &str) -> Option<f64> {
    let (num, den) = match value.split_once('/') {
        Some((num, den)) => (num.parse::<f64>().ok()?, den.parse::<f64>().ok()?),
        None => (value.parse::<f64>().ok()?, 1.0),
    };
    if num <= 0.0 || den <= 0.0 {
        return None;
    }
    Some(num / den)
}
