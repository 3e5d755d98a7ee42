use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    generation::GenerationParams,
    pipeline::{ContinuationPolicy, PipelineSettings, RetryPolicy},
    video::CodecKind,
};

/// Main configuration for the Longform-Compositor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Parameters sent with every generation request
    #[serde(default)]
    pub generation: GenerationParams,

    /// Segment count, continuation policy and retry behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output video settings
    #[serde(default)]
    pub video: VideoConfig,

    /// Remote generation API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.generation.validate().map_err(|e| ConfigError::InvalidValue {
            key: "generation".to_string(),
            value: e.to_string(),
        })?;
        self.pipeline.validate()?;
        self.video.validate()?;
        self.api.validate()?;
        Ok(())
    }

    /// Settings handed to the pipeline controller
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            total_segments: self.pipeline.total_segments,
            continuation: self.pipeline.continuation,
            retry: self.pipeline.retry.clone(),
            crossfade_duration: self.video.crossfade_duration,
            fps: self.video.fps,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of segments to generate
    pub total_segments: usize,

    /// What happens to later segments when one fails
    pub continuation: ContinuationPolicy,

    /// Retry behaviour for failed generation attempts
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total_segments: 3,
            continuation: ContinuationPolicy::Strict,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.total_segments == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.total_segments".to_string(),
                value: self.total_segments.to_string()
            }.into());
        }

        if self.retry.multiplier < 1.0 || !self.retry.multiplier.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.retry.multiplier".to_string(),
                value: self.retry.multiplier.to_string()
            }.into());
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.retry.jitter".to_string(),
                value: self.retry.jitter.to_string()
            }.into());
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.retry.delay_range".to_string(),
                value: format!("{}-{}", self.retry.base_delay_ms, self.retry.max_delay_ms)
            }.into());
        }

        Ok(())
    }
}

/// Video output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Output frame rate
    pub fps: u32,

    /// Crossfade between consecutive segments (seconds, 0 = hard cut)
    pub crossfade_duration: f64,

    /// Width of the seed stills sent for animation
    pub width: u32,

    /// Height of the seed stills sent for animation
    pub height: u32,

    /// Encoder backend
    pub codec: CodecKind,

    /// Encode quality (0-100)
    pub quality: u8,

    /// Number of parallel processing threads
    pub processing_threads: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 24,
            crossfade_duration: 0.5,
            width: 1024,
            height: 576,
            codec: CodecKind::Ffmpeg,
            quality: 85,
            processing_threads: num_cpus::get(),
        }
    }
}

impl VideoConfig {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.fps".to_string(),
                value: self.fps.to_string()
            }.into());
        }

        if !self.crossfade_duration.is_finite() || self.crossfade_duration < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "video.crossfade_duration".to_string(),
                value: self.crossfade_duration.to_string()
            }.into());
        }

        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.resolution".to_string(),
                value: format!("{}x{}", self.width, self.height)
            }.into());
        }

        if self.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "video.quality".to_string(),
                value: self.quality.to_string()
            }.into());
        }

        if self.processing_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.processing_threads".to_string(),
                value: self.processing_threads.to_string()
            }.into());
        }

        Ok(())
    }
}

/// Generation API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the generation service
    pub base_url: String,

    /// Engine used for text-to-image stills
    pub text_to_image_engine: String,

    /// Still image width requested from text-to-image
    pub image_width: u32,

    /// Still image height requested from text-to-image
    pub image_height: u32,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    /// Delay between video result polls
    pub poll_interval_ms: u64,

    /// Give up on a video job after this long
    pub poll_timeout_secs: u64,

    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.stability.ai".to_string(),
            text_to_image_engine: "stable-diffusion-xl-1024-v1-0".to_string(),
            image_width: 1024,
            image_height: 1024,
            request_timeout_secs: 120,
            poll_interval_ms: 2000,
            poll_timeout_secs: 600,
            api_key_env: "STABILITY_API_KEY".to_string(),
        }
    }
}

impl ApiConfig {
    /// Look the API key up in the configured environment variable
    pub fn api_key_from_env(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey { key: self.api_key_env.clone() }.into())
    }

    fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "api.base_url".to_string(),
                value: self.base_url.clone()
            }.into());
        }

        if self.text_to_image_engine.trim().is_empty() {
            return Err(ConfigError::MissingKey {
                key: "api.text_to_image_engine".to_string()
            }.into());
        }

        if self.image_width == 0 || self.image_height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.image_size".to_string(),
                value: format!("{}x{}", self.image_width, self.image_height)
            }.into());
        }

        if self.poll_interval_ms == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.timing".to_string(),
                value: format!("poll {}ms, timeout {}s", self.poll_interval_ms, self.request_timeout_secs)
            }.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.generation.seed = Some(1234);
        original_config.pipeline.continuation = ContinuationPolicy::Lenient;

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(
            &file_path,
            "[video]\nfps = 30\ncrossfade_duration = 0.0\nwidth = 768\nheight = 768\ncodec = \"apng\"\nquality = 90\nprocessing_threads = 2\n",
        )
        .unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.video.fps, 30);
        assert_eq!(config.video.codec, CodecKind::Apng);
        assert_eq!(config.pipeline.total_segments, 3);
        assert_eq!(config.pipeline_settings().fps, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_and_bad_toml() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Config::from_file(dir.path().join("absent.toml")),
            Err(crate::error::CompositorError::Config(ConfigError::FileNotFound { .. }))
        ));

        let file_path = dir.path().join("broken.toml");
        std::fs::write(&file_path, "[pipeline\ntotal_segments = ").unwrap();
        assert!(matches!(
            Config::from_file(&file_path),
            Err(crate::error::CompositorError::Config(ConfigError::ParseFailed { .. }))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.pipeline.total_segments = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.video.crossfade_duration = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.motion_strength = 300.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.api.base_url = "ftp://example".to_string();
        assert!(config.validate().is_err());
    }
}
