//! In-process backend for tests: answers from a script of outcomes and renders
//! real APNG clips so the rest of the pipeline can decode them.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::generation::backend::GenerationBackend;
use crate::video::{ApngCodec, Frame, VideoCodec};

pub(crate) const CLIP_WIDTH: u32 = 8;
pub(crate) const CLIP_HEIGHT: u32 = 6;
pub(crate) const CLIP_FPS: u32 = 10;
pub(crate) const CLIP_FRAMES: usize = 10;

/// Colour of the final frame of the `n`-th clip the backend hands out
pub(crate) fn last_color(n: usize) -> [u8; 3] {
    [(n as u8).wrapping_mul(40).wrapping_add(20), 200, 10]
}

/// One scripted answer to `image_to_video`
pub(crate) enum Reply {
    /// A decodable APNG clip
    Clip,
    Error(GenerationError),
    /// Non-empty bytes no codec can read
    Corrupt,
}

/// Payload handed out for [`Reply::Corrupt`]
pub(crate) const CORRUPT_CLIP: &[u8] = b"\0\0\0\x18ftypisom truncated";

pub(crate) struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    seed_images: Mutex<Vec<Vec<u8>>>,
    prompts: Mutex<Vec<String>>,
    delivered: Mutex<usize>,
}

impl ScriptedBackend {
    /// Every call succeeds
    pub(crate) fn succeeding() -> Self {
        Self::with_script(Vec::new())
    }

    /// Each `image_to_video` call pops one entry: `None` succeeds, `Some(err)`
    /// fails. Once the script runs out, calls succeed.
    pub(crate) fn with_script(script: Vec<Option<GenerationError>>) -> Self {
        Self::with_replies(
            script
                .into_iter()
                .map(|outcome| outcome.map_or(Reply::Clip, Reply::Error))
                .collect(),
        )
    }

    /// Like [`with_script`](Self::with_script) but can also hand out corrupt clips
    pub(crate) fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seed_images: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            delivered: Mutex::new(0),
        }
    }

    /// Seed images received by `image_to_video`, in call order
    pub(crate) fn seed_images(&self) -> Vec<Vec<u8>> {
        self.seed_images.lock().unwrap().clone()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn video_calls(&self) -> usize {
        self.seed_images.lock().unwrap().len()
    }

    fn render_clip(n: usize) -> Vec<u8> {
        let frames: Vec<Frame> = (0..CLIP_FRAMES)
            .map(|i| {
                if i + 1 == CLIP_FRAMES {
                    Frame::new_filled(CLIP_WIDTH, CLIP_HEIGHT, last_color(n))
                } else {
                    Frame::new_filled(CLIP_WIDTH, CLIP_HEIGHT, [i as u8 * 10, n as u8, 0])
                }
            })
            .collect();
        ApngCodec::new().encode(&frames, CLIP_FPS).unwrap()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn text_to_image(
        &self,
        prompt: &str,
        _cfg_scale: f64,
        _seed: Option<u32>,
    ) -> Result<Vec<u8>, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(Frame::new_filled(16, 16, [90, 90, 90]).to_png_bytes().unwrap())
    }

    async fn image_to_video(
        &self,
        image: &[u8],
        _motion_strength: f64,
        _cfg_scale: f64,
        _seed: Option<u32>,
    ) -> Result<Vec<u8>, GenerationError> {
        self.seed_images.lock().unwrap().push(image.to_vec());

        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Error(err)) => return Err(err),
            Some(Reply::Corrupt) => return Ok(CORRUPT_CLIP.to_vec()),
            Some(Reply::Clip) | None => {}
        }

        let mut delivered = self.delivered.lock().unwrap();
        let clip = Self::render_clip(*delivered);
        *delivered += 1;
        Ok(clip)
    }
}
