use thiserror::Error;

/// Main error type for the Longform-Compositor library
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Errors raised while producing a single segment
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Local validation failure, caught before any network call
    #[error("Invalid generation request: {details}")]
    InvalidRequest { details: String },

    /// Non-success response (or no response at all) from the generation API
    #[error("Generation API error ({}): {message}", status_label(.status))]
    Remote { status: Option<u16>, message: String },

    /// Fault inside this process, such as a panicked worker task
    #[error("Internal generation failure: {reason}")]
    Internal { reason: String },
}

/// Video-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VideoError {
    #[error("Video decoding failed: {reason}")]
    DecodeFailed { reason: String },

    #[error("Video encoding failed: {reason}")]
    EncodeFailed { reason: String },

    #[error("No segments to concatenate")]
    EmptyInput,

    #[error("Invalid video parameters: {details}")]
    InvalidParameters { details: String },
}

/// Pipeline-level errors (the run could not even start or its task died)
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid pipeline settings: {details}")]
    InvalidSettings { details: String },

    #[error("Pipeline task failed: {reason}")]
    TaskFailed { reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no status".to_string(),
    }
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

impl GenerationError {
    pub fn invalid<S: Into<String>>(details: S) -> Self {
        Self::InvalidRequest { details: details.into() }
    }

    pub fn remote<S: Into<String>>(status: Option<u16>, message: S) -> Self {
        Self::Remote { status, message: message.into() }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Client rejections (4xx) are definitive except for timeouts and rate limits.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest { .. } => false,
            Self::Remote { status: Some(status), .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            Self::Remote { status: None, .. } => true,
            Self::Internal { .. } => false,
        }
    }
}

impl VideoError {
    pub fn decode<S: Into<String>>(reason: S) -> Self {
        Self::DecodeFailed { reason: reason.into() }
    }

    pub fn encode<S: Into<String>>(reason: S) -> Self {
        Self::EncodeFailed { reason: reason.into() }
    }
}

impl CompositorError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Generation(e) => e.is_retryable(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Generation(GenerationError::Remote { status: Some(401), .. }) => {
                "The generation API rejected the API key. Check STABILITY_API_KEY or --api-key.".to_string()
            }
            Self::Generation(GenerationError::InvalidRequest { details }) => {
                format!("The generation settings are invalid: {}", details)
            }
            Self::Video(VideoError::EncodeFailed { reason }) if reason.contains("ffmpeg") => {
                format!("Could not encode the output video ({}). Is FFmpeg installed?", reason)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
