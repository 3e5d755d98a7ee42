use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// Accepted classifier-free guidance scale
pub const CFG_SCALE_RANGE: RangeInclusive<f64> = 0.0..=35.0;

/// Accepted motion strength (maps onto the API's motion bucket id)
pub const MOTION_STRENGTH_RANGE: RangeInclusive<f64> = 1.0..=255.0;

/// Largest seed the generation API accepts
pub const MAX_SEED: u32 = 4_294_967_294;

/// Where a segment's animation seed comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedMode {
    /// Prompt -> still image -> video
    TextSeed,
    /// Image -> video (user upload or a previous segment's last frame)
    ImageSeed,
}

/// Generation knobs shared by every segment of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// How strongly the output follows the seed (0-35)
    pub cfg_scale: f64,

    /// Amount of synthetic motion (1-255)
    pub motion_strength: f64,

    /// Fixed seed for reproducible output; unset lets the API pick
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            cfg_scale: 1.8,
            motion_strength: 127.0,
            seed: None,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !self.cfg_scale.is_finite() || !CFG_SCALE_RANGE.contains(&self.cfg_scale) {
            return Err(GenerationError::invalid(format!(
                "cfg_scale {} is outside {:?}",
                self.cfg_scale, CFG_SCALE_RANGE
            )));
        }
        if !self.motion_strength.is_finite() || !MOTION_STRENGTH_RANGE.contains(&self.motion_strength) {
            return Err(GenerationError::invalid(format!(
                "motion_strength {} is outside {:?}",
                self.motion_strength, MOTION_STRENGTH_RANGE
            )));
        }
        if let Some(seed) = self.seed {
            if seed > MAX_SEED {
                return Err(GenerationError::invalid(format!(
                    "seed {} exceeds the maximum of {}",
                    seed, MAX_SEED
                )));
            }
        }
        Ok(())
    }
}

/// Everything needed to generate one segment
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub mode: SeedMode,
    pub prompt: Option<String>,
    pub seed_image: Option<Vec<u8>>,
    pub cfg_scale: f64,
    pub motion_strength: f64,
    pub seed: Option<u32>,
}

impl GenerationRequest {
    /// Text-seeded request
    pub fn from_prompt<S: Into<String>>(prompt: S, params: &GenerationParams) -> Self {
        Self {
            mode: SeedMode::TextSeed,
            prompt: Some(prompt.into()),
            seed_image: None,
            cfg_scale: params.cfg_scale,
            motion_strength: params.motion_strength,
            seed: params.seed,
        }
    }

    /// Image-seeded request
    pub fn from_image(image: Vec<u8>, params: &GenerationParams) -> Self {
        Self {
            mode: SeedMode::ImageSeed,
            prompt: None,
            seed_image: Some(image),
            cfg_scale: params.cfg_scale,
            motion_strength: params.motion_strength,
            seed: params.seed,
        }
    }

    /// Continuation of this request seeded by `frame` (a previous segment's last
    /// frame). Parameters carry over; the prompt is kept for reference only.
    pub fn chained(&self, frame: Vec<u8>) -> Self {
        Self {
            mode: SeedMode::ImageSeed,
            prompt: self.prompt.clone(),
            seed_image: Some(frame),
            cfg_scale: self.cfg_scale,
            motion_strength: self.motion_strength,
            seed: self.seed,
        }
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            cfg_scale: self.cfg_scale,
            motion_strength: self.motion_strength,
            seed: self.seed,
        }
    }

    /// Local checks run before any network call
    pub fn validate(&self) -> Result<(), GenerationError> {
        match self.mode {
            SeedMode::TextSeed => {
                if self.prompt.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(GenerationError::invalid("text-seeded request needs a non-empty prompt"));
                }
            }
            SeedMode::ImageSeed => {
                if self.seed_image.as_deref().map(<[u8]>::is_empty).unwrap_or(true) {
                    return Err(GenerationError::invalid("image-seeded request needs a non-empty seed image"));
                }
            }
        }
        self.params().validate()
    }

    /// Short human-readable description for logs
    pub fn describe(&self) -> String {
        match self.mode {
            SeedMode::TextSeed => format!(
                "text seed \"{}\"",
                self.prompt.as_deref().unwrap_or("").chars().take(48).collect::<String>()
            ),
            SeedMode::ImageSeed => format!(
                "image seed ({} bytes)",
                self.seed_image.as_ref().map(Vec::len).unwrap_or(0)
            ),
        }
    }
}
