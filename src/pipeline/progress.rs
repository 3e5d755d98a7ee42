//! Progress events written by the pipeline controller.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::pipeline::run::RunState;

/// What happened on a single generation attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Failed, another attempt follows after `delay_ms`
    Retrying { delay_ms: u64 },
    /// Failed for good
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        total_segments: usize,
    },
    SegmentAttempt {
        segment_index: usize,
        attempt: u32,
        outcome: AttemptOutcome,
        error: Option<String>,
    },
    Concatenating {
        segment_count: usize,
    },
    Finished {
        state: RunState,
        failed_segments: Vec<usize>,
    },
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunStarted { total_segments } => {
                write!(f, "run started ({} segments)", total_segments)
            }
            Self::SegmentAttempt { segment_index, attempt, outcome, error } => {
                write!(f, "segment {} attempt {}: ", segment_index + 1, attempt)?;
                match outcome {
                    AttemptOutcome::Succeeded => write!(f, "succeeded")?,
                    AttemptOutcome::Retrying { delay_ms } => write!(f, "retrying in {}ms", delay_ms)?,
                    AttemptOutcome::Failed => write!(f, "failed")?,
                }
                if let Some(error) = error {
                    write!(f, " ({})", error)?;
                }
                Ok(())
            }
            Self::Concatenating { segment_count } => {
                write!(f, "concatenating {} segments", segment_count)
            }
            Self::Finished { state, failed_segments } => {
                write!(f, "finished: {}", state)?;
                if !failed_segments.is_empty() {
                    let list: Vec<String> = failed_segments.iter().map(|i| (i + 1).to_string()).collect();
                    write!(f, " (failed segments: {})", list.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Drain whatever is queued without waiting
pub fn drain(receiver: &mut ProgressReceiver) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
