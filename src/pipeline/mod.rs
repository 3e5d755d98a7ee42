//! # Pipeline Controller
//!
//! Sequential segment generation with chaining, retry/backoff, continuation
//! policy, progress events, cooperative cancellation and final concatenation.

pub mod controller;
pub mod progress;
pub mod retry;
pub mod run;

pub use controller::{ContinuationPolicy, PipelineController, PipelineHandle, PipelineSettings};
pub use progress::{AttemptOutcome, ProgressEvent, ProgressReceiver, ProgressSender};
pub use retry::RetryPolicy;
pub use run::{PipelineRun, RunReport, RunState, Segment, SegmentFailure, SegmentStatus};
