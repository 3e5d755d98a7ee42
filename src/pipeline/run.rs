use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::generation::GenerationRequest;
use crate::pipeline::controller::PipelineSettings;
use crate::video::FinalVideo;

/// Lifecycle of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyCompleted | Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    Succeeded,
    Failed { reason: String },
}

/// One generated clip of the run
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub index: usize,
    #[serde(skip)]
    pub source: GenerationRequest,
    #[serde(skip)]
    pub video: Option<Vec<u8>>,
    /// Clip length in seconds, known once the segment succeeded
    pub duration: Option<f64>,
    pub status: SegmentStatus,
    pub attempts: u32,
}

impl Segment {
    pub fn new(index: usize, source: GenerationRequest) -> Self {
        Self {
            index,
            source,
            video: None,
            duration: None,
            status: SegmentStatus::Pending,
            attempts: 0,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == SegmentStatus::Succeeded
    }

    pub fn is_pending(&self) -> bool {
        self.status == SegmentStatus::Pending
    }

    /// Settle a pending segment as succeeded. Settled segments never change.
    pub(crate) fn succeed(&mut self, video: Vec<u8>, duration: f64) {
        if !self.is_pending() {
            return;
        }
        self.video = Some(video);
        self.duration = Some(duration);
        self.status = SegmentStatus::Succeeded;
    }

    /// Settle a pending segment as failed. Settled segments never change.
    pub(crate) fn fail<S: Into<String>>(&mut self, reason: S) {
        if !self.is_pending() {
            return;
        }
        self.status = SegmentStatus::Failed { reason: reason.into() };
    }
}

/// A failed segment and the last error it saw
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentFailure {
    pub segment_index: usize,
    pub reason: String,
}

/// State owned by a single run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub total_segments: usize,
    pub segments: Vec<Segment>,
    pub crossfade_duration: f64,
    pub fps: u32,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            total_segments: settings.total_segments,
            segments: Vec::with_capacity(settings.total_segments),
            crossfade_duration: settings.crossfade_duration,
            fps: settings.fps,
            state: RunState::Idle,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    /// Append the next segment; indices always match positions
    pub(crate) fn push_segment(&mut self, segment: Segment) {
        debug_assert_eq!(segment.index, self.segments.len());
        self.segments.push(segment);
    }

    pub fn successful_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_succeeded())
    }

    /// Encoded clips of every succeeded segment, in order
    pub fn successful_videos(&self) -> Vec<Vec<u8>> {
        self.successful_segments()
            .filter_map(|s| s.video.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<SegmentFailure> {
        self.segments
            .iter()
            .filter_map(|s| match &s.status {
                SegmentStatus::Failed { reason } => Some(SegmentFailure {
                    segment_index: s.index,
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn elapsed_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let finished = self.finished_at.unwrap_or_else(Utc::now);
        Some((finished - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// Everything a caller needs after a run ends
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: PipelineRun,
    pub final_video: Option<FinalVideo>,
    pub failures: Vec<SegmentFailure>,
    pub cancelled: bool,
    /// Run-level fatal error, such as a concatenation failure
    pub error: Option<String>,
}

impl RunReport {
    pub fn state(&self) -> RunState {
        self.run.state
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.segment_index).collect()
    }
}
