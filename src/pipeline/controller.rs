use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result, VideoError};
use crate::generation::{GenerationRequest, SegmentGenerator};
use crate::pipeline::progress::{
    progress_channel, AttemptOutcome, ProgressEvent, ProgressReceiver, ProgressSender,
};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::run::{PipelineRun, RunReport, RunState, Segment};
use crate::video::{Concatenator, FinalVideo, FrameExtractor, VideoCodec};

/// What happens to the rest of the run once a segment has exhausted its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationPolicy {
    /// Stop the run; nothing gets concatenated
    #[default]
    Strict,
    /// Skip the segment and keep chaining from the last good one
    Lenient,
}

/// Per-run knobs for the controller
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub total_segments: usize,
    pub continuation: ContinuationPolicy,
    pub retry: RetryPolicy,
    pub crossfade_duration: f64,
    pub fps: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            total_segments: 3,
            continuation: ContinuationPolicy::Strict,
            retry: RetryPolicy::default(),
            crossfade_duration: 0.5,
            fps: 24,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        if self.total_segments == 0 {
            return Err(PipelineError::InvalidSettings {
                details: "total_segments must be at least 1".to_string(),
            });
        }
        if self.fps == 0 {
            return Err(PipelineError::InvalidSettings {
                details: "fps must be greater than zero".to_string(),
            });
        }
        if !self.crossfade_duration.is_finite() || self.crossfade_duration < 0.0 {
            return Err(PipelineError::InvalidSettings {
                details: format!("crossfade_duration {} must be >= 0", self.crossfade_duration),
            });
        }
        Ok(())
    }
}

enum SegmentOutcome {
    /// Carries the extracted last frame when a later segment will chain from it
    Succeeded(Option<Vec<u8>>),
    Failed,
    Cancelled,
}

/// Drives a run: generates segments in order, chains each from the last good
/// segment's final frame, retries with backoff, then concatenates.
pub struct PipelineController {
    generator: SegmentGenerator,
    extractor: FrameExtractor,
    concatenator: Concatenator,
    settings: PipelineSettings,
}

impl PipelineController {
    pub fn new(generator: SegmentGenerator, codec: Arc<dyn VideoCodec>, settings: PipelineSettings) -> Self {
        Self {
            generator,
            extractor: FrameExtractor::new(codec.clone()),
            concatenator: Concatenator::new(codec),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the pipeline on a background task
    pub fn spawn(self: Arc<Self>, initial: GenerationRequest) -> PipelineHandle {
        let (tx, rx) = progress_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move { self.run(initial, Some(tx), &task_cancel).await });

        PipelineHandle { progress: rx, cancel, task }
    }

    /// Execute one run to completion.
    ///
    /// Only invalid settings produce `Err`; segment and concatenation failures
    /// are reported through the returned [`RunReport`].
    pub async fn run(
        &self,
        initial: GenerationRequest,
        progress: Option<ProgressSender>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        self.settings.validate()?;

        let total = self.settings.total_segments;
        let mut run = PipelineRun::new(&self.settings);
        run.start();
        emit(&progress, ProgressEvent::RunStarted { total_segments: total });
        info!(
            "🎬 Starting run: {} segments via {} ({:?} continuation)",
            total,
            self.generator.backend_name(),
            self.settings.continuation
        );

        let mut chain_seed: Option<Vec<u8>> = None;
        let mut cancelled = false;
        let mut aborted = false;

        for index in 0..total {
            if cancel.is_cancelled() {
                info!("⏹️  Run cancelled before segment {}", index + 1);
                cancelled = true;
                break;
            }

            let source = if index == 0 {
                initial.clone()
            } else {
                match &chain_seed {
                    Some(frame) => initial.chained(frame.clone()),
                    None => {
                        error!("No successful segment to chain segment {} from", index + 1);
                        aborted = true;
                        break;
                    }
                }
            };

            info!("🎞️  Segment {}/{}: {}", index + 1, total, source.describe());
            let mut segment = Segment::new(index, source);
            let chains_further = index + 1 < total;

            match self.produce_segment(&mut segment, chains_further, &progress, cancel).await {
                SegmentOutcome::Succeeded(seed) => {
                    if let Some(seed) = seed {
                        chain_seed = Some(seed);
                    }
                }
                SegmentOutcome::Failed => {
                    if index == 0 {
                        warn!("First segment failed, aborting run");
                        aborted = true;
                    } else if self.settings.continuation == ContinuationPolicy::Strict {
                        warn!("Segment {} failed, aborting run (strict continuation)", index + 1);
                        aborted = true;
                    } else {
                        warn!("Segment {} failed, skipping (lenient continuation)", index + 1);
                    }
                }
                SegmentOutcome::Cancelled => cancelled = true,
            }

            run.push_segment(segment);
            if aborted || cancelled {
                break;
            }
        }

        if cancel.is_cancelled() {
            cancelled = true;
        }

        let mut final_video = None;
        let mut run_error = None;

        let state = if cancelled || aborted {
            RunState::Failed
        } else {
            let videos = run.successful_videos();
            if videos.is_empty() {
                RunState::Failed
            } else {
                emit(&progress, ProgressEvent::Concatenating { segment_count: videos.len() });
                info!("🎬 Concatenating {} segments...", videos.len());

                match self.concatenate(videos).await {
                    Ok(video) => {
                        info!(
                            "✅ Final video: {:.2}s, {} frames @ {}fps",
                            video.total_duration, video.frame_count, video.fps
                        );
                        final_video = Some(video);
                        if run.failures().is_empty() {
                            RunState::Completed
                        } else {
                            RunState::PartiallyCompleted
                        }
                    }
                    Err(e) => {
                        error!("❌ Concatenation failed: {}", e);
                        run_error = Some(e.to_string());
                        RunState::Failed
                    }
                }
            }
        };

        run.finish(state);
        let failures = run.failures();
        emit(
            &progress,
            ProgressEvent::Finished {
                state,
                failed_segments: failures.iter().map(|f| f.segment_index).collect(),
            },
        );
        info!(
            "🏁 Run {} after {:.1}s ({} of {} segments succeeded)",
            state,
            run.elapsed_seconds().unwrap_or_default(),
            run.successful_segments().count(),
            total
        );

        Ok(RunReport {
            run,
            final_video,
            failures,
            cancelled,
            error: run_error,
        })
    }

    /// Generate one segment with retries, settling its status exactly once
    async fn produce_segment(
        &self,
        segment: &mut Segment,
        chains_further: bool,
        progress: &Option<ProgressSender>,
        cancel: &CancellationToken,
    ) -> SegmentOutcome {
        let retry = &self.settings.retry;
        let max_attempts = retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            segment.attempts = attempt;

            let err = match self.generator.generate(&segment.source).await {
                Ok(video) => {
                    return match self.inspect(video, chains_further).await {
                        Ok((video, duration, seed)) => {
                            debug!("Segment {} is {:.2}s", segment.index + 1, duration);
                            segment.succeed(video, duration);
                            emit(progress, attempt_event(segment.index, attempt, AttemptOutcome::Succeeded, None));
                            SegmentOutcome::Succeeded(seed)
                        }
                        Err(e) => {
                            warn!("Segment {} produced an unusable clip: {}", segment.index + 1, e);
                            segment.fail(e.to_string());
                            emit(
                                progress,
                                attempt_event(segment.index, attempt, AttemptOutcome::Failed, Some(e.to_string())),
                            );
                            SegmentOutcome::Failed
                        }
                    };
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                warn!(
                    "Segment {} failed after {} attempt(s): {}",
                    segment.index + 1,
                    attempt,
                    err
                );
                segment.fail(err.to_string());
                emit(
                    progress,
                    attempt_event(segment.index, attempt, AttemptOutcome::Failed, Some(err.to_string())),
                );
                return SegmentOutcome::Failed;
            }

            let delay = retry.delay_for_retry(attempt);
            warn!(
                "Segment {} attempt {}/{} failed: {}. Retrying in {:?}",
                segment.index + 1,
                attempt,
                max_attempts,
                err,
                delay
            );
            emit(
                progress,
                attempt_event(
                    segment.index,
                    attempt,
                    AttemptOutcome::Retrying { delay_ms: delay.as_millis() as u64 },
                    Some(err.to_string()),
                ),
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("⏹️  Run cancelled while segment {} was backing off", segment.index + 1);
                    segment.fail(format!("cancelled after {} attempt(s); last error: {}", attempt, err));
                    return SegmentOutcome::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Probe a fresh clip and, if needed, pull its last frame for chaining
    async fn inspect(
        &self,
        video: Vec<u8>,
        extract_seed: bool,
    ) -> std::result::Result<(Vec<u8>, f64, Option<Vec<u8>>), VideoError> {
        let codec = self.concatenator.codec().clone();
        let extractor = self.extractor.clone();

        tokio::task::spawn_blocking(move || -> std::result::Result<_, VideoError> {
            let info = codec.probe(&video)?;
            let seed = if extract_seed {
                Some(extractor.extract_last_frame(&video)?)
            } else {
                None
            };
            Ok((video, info.duration, seed))
        })
        .await
        .map_err(|e| VideoError::decode(format!("media task failed: {}", e)))?
    }

    async fn concatenate(&self, videos: Vec<Vec<u8>>) -> std::result::Result<FinalVideo, VideoError> {
        let concatenator = self.concatenator.clone();
        let crossfade = self.settings.crossfade_duration;
        let fps = self.settings.fps;

        tokio::task::spawn_blocking(move || concatenator.concatenate(&videos, crossfade, fps))
            .await
            .map_err(|e| VideoError::encode(format!("concatenation task failed: {}", e)))?
    }
}

/// A run executing on its own task
pub struct PipelineHandle {
    pub progress: ProgressReceiver,
    cancel: CancellationToken,
    task: JoinHandle<Result<RunReport>>,
}

impl PipelineHandle {
    /// Request cooperative cancellation; takes effect between segments or
    /// during a retry backoff
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<RunReport> {
        self.task.await.map_err(|e| PipelineError::TaskFailed { reason: e.to_string() })?
    }
}

fn attempt_event(
    segment_index: usize,
    attempt: u32,
    outcome: AttemptOutcome,
    error: Option<String>,
) -> ProgressEvent {
    ProgressEvent::SegmentAttempt { segment_index, attempt, outcome, error }
}

fn emit(progress: &Option<ProgressSender>, event: ProgressEvent) {
    if let Some(tx) = progress {
        // A dropped receiver just means nobody is listening
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::generation::scripted::{self, Reply, ScriptedBackend};
    use crate::generation::GenerationParams;
    use crate::pipeline::progress::drain;
    use crate::video::{ApngCodec, ClipInfo, Frame, FrameSequence};

    const RESOLUTION: (u32, u32) = (scripted::CLIP_WIDTH, scripted::CLIP_HEIGHT);

    fn settings(total_segments: usize, continuation: ContinuationPolicy, max_retries: u32) -> PipelineSettings {
        PipelineSettings {
            total_segments,
            continuation,
            retry: RetryPolicy::immediate(max_retries),
            crossfade_duration: 0.0,
            fps: scripted::CLIP_FPS,
        }
    }

    fn controller(backend: Arc<ScriptedBackend>, settings: PipelineSettings) -> PipelineController {
        let generator = SegmentGenerator::new(backend, RESOLUTION);
        PipelineController::new(generator, Arc::new(ApngCodec::new()), settings)
    }

    /// APNG codec that can be told to fail seed extraction or the final encode
    #[derive(Default)]
    struct FailingCodec {
        inner: ApngCodec,
        fail_last_frame: bool,
        fail_encode: bool,
    }

    impl VideoCodec for FailingCodec {
        fn name(&self) -> &str {
            "failing"
        }

        fn extension(&self) -> &str {
            self.inner.extension()
        }

        fn decode(&self, bytes: &[u8]) -> std::result::Result<FrameSequence, VideoError> {
            self.inner.decode(bytes)
        }

        fn encode(&self, frames: &[Frame], fps: u32) -> std::result::Result<Vec<u8>, VideoError> {
            if self.fail_encode {
                return Err(VideoError::encode("disk full"));
            }
            self.inner.encode(frames, fps)
        }

        fn probe(&self, bytes: &[u8]) -> std::result::Result<ClipInfo, VideoError> {
            self.inner.probe(bytes)
        }

        fn last_frame(&self, bytes: &[u8]) -> std::result::Result<Frame, VideoError> {
            if self.fail_last_frame {
                return Err(VideoError::decode("no keyframe near the end"));
            }
            self.inner.last_frame(bytes)
        }
    }

    fn controller_with_codec(
        backend: Arc<ScriptedBackend>,
        codec: FailingCodec,
        settings: PipelineSettings,
    ) -> PipelineController {
        let generator = SegmentGenerator::new(backend, RESOLUTION);
        PipelineController::new(generator, Arc::new(codec), settings)
    }

    fn prompt() -> GenerationRequest {
        GenerationRequest::from_prompt("a slow pan over mountains", &GenerationParams::default())
    }

    fn server_error() -> Option<GenerationError> {
        Some(GenerationError::remote(Some(503), "service unavailable"))
    }

    fn assert_color_near(actual: [u8; 3], expected: [u8; 3]) {
        for c in 0..3 {
            assert!(
                (actual[c] as i16 - expected[c] as i16).abs() <= 1,
                "{:?} vs {:?}",
                actual,
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_full_run_concatenates_every_segment() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Strict, 2));
        let (tx, mut rx) = progress_channel();

        let report = controller.run(prompt(), Some(tx), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Completed);
        let video = report.final_video.as_ref().unwrap();
        assert_eq!(video.segment_count, 3);
        assert_eq!(video.frame_count, 3 * scripted::CLIP_FRAMES);
        assert!(report.failures.is_empty());
        assert!(report.run.segments.iter().all(|s| s.duration == Some(1.0)));

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&ProgressEvent::RunStarted { total_segments: 3 }));
        assert!(events.contains(&ProgressEvent::Concatenating { segment_count: 3 }));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Finished { state: RunState::Completed, failed_segments: vec![] })
        );
    }

    #[tokio::test]
    async fn test_later_segments_chain_from_last_frame() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Strict, 0));

        controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        let seeds = backend.seed_images();
        assert_eq!(seeds.len(), 3);
        assert_eq!(backend.prompts().len(), 1);
        assert_color_near(Frame::from_image_bytes(&seeds[1]).unwrap().get_pixel(0, 0), scripted::last_color(0));
        assert_color_near(Frame::from_image_bytes(&seeds[2]).unwrap().get_pixel(0, 0), scripted::last_color(1));
    }

    #[tokio::test]
    async fn test_retries_within_budget_succeed() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![server_error(), server_error()]));
        let controller = controller(backend.clone(), settings(1, ContinuationPolicy::Strict, 2));
        let (tx, mut rx) = progress_channel();

        let report = controller.run(prompt(), Some(tx), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Completed);
        assert_eq!(report.run.segments[0].attempts, 3);
        let retries = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::SegmentAttempt { outcome: AttemptOutcome::Retrying { .. }, .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_retries_beyond_budget_fail() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![server_error(), server_error()]));
        let controller = controller(backend.clone(), settings(1, ContinuationPolicy::Strict, 1));

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert!(report.final_video.is_none());
        assert_eq!(report.run.segments[0].attempts, 2);
        assert_eq!(backend.video_calls(), 2);
    }

    #[tokio::test]
    async fn test_client_rejection_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![Some(GenerationError::remote(
            Some(400),
            "bad motion bucket",
        ))]));
        let controller = controller(backend.clone(), settings(2, ContinuationPolicy::Lenient, 3));

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert_eq!(report.failed_indices(), vec![0]);
        assert_eq!(backend.video_calls(), 1);
    }

    #[tokio::test]
    async fn test_lenient_skips_failed_segment_and_chains_from_last_success() {
        // segment 0 ok, segment 1 fails with no retries left, segment 2 ok
        let backend = Arc::new(ScriptedBackend::with_script(vec![None, server_error()]));
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Lenient, 0));

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::PartiallyCompleted);
        assert_eq!(report.final_video.as_ref().unwrap().segment_count, 2);
        assert_eq!(report.failed_indices(), vec![1]);

        let seeds = backend.seed_images();
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[1], seeds[2]);
        assert_color_near(Frame::from_image_bytes(&seeds[2]).unwrap().get_pixel(0, 0), scripted::last_color(0));
    }

    #[tokio::test]
    async fn test_strict_failure_mid_run_skips_concatenation() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![None, server_error()]));
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Strict, 0));
        let (tx, mut rx) = progress_channel();

        let report = controller.run(prompt(), Some(tx), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert!(report.final_video.is_none());
        assert_eq!(report.run.segments.len(), 2);
        assert!(report.run.segments[0].is_succeeded());
        assert_eq!(backend.video_calls(), 2);
        assert!(!drain(&mut rx).iter().any(|e| matches!(e, ProgressEvent::Concatenating { .. })));
    }

    #[tokio::test]
    async fn test_first_segment_failure_aborts_even_when_lenient() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![server_error()]));
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Lenient, 0));

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert_eq!(report.run.segments.len(), 1);
        assert_eq!(backend.video_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_initial_request_fails_without_network() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let controller = controller(backend.clone(), settings(2, ContinuationPolicy::Strict, 2));

        let report = controller
            .run(GenerationRequest::from_prompt("", &GenerationParams::default()), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert_eq!(report.run.segments[0].attempts, 1);
        assert_eq!(backend.video_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_segments_and_skips_concat() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Strict, 0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = controller.run(prompt(), None, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.state(), RunState::Failed);
        assert!(report.final_video.is_none());
        assert_eq!(backend.video_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![None, server_error()]));
        let mut settings = settings(3, ContinuationPolicy::Strict, 3);
        settings.retry = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            multiplier: 1.0,
            jitter: 0.0,
        };
        let controller = Arc::new(controller(backend.clone(), settings));

        let mut handle = controller.spawn(prompt());
        while let Some(event) = handle.progress.recv().await {
            if matches!(event, ProgressEvent::SegmentAttempt { outcome: AttemptOutcome::Retrying { .. }, .. }) {
                handle.cancel();
            }
        }
        let report = handle.join().await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.state(), RunState::Failed);
        assert!(report.run.segments[0].is_succeeded());
        assert_eq!(report.failed_indices(), vec![1]);
        assert!(report.final_video.is_none());
    }

    #[tokio::test]
    async fn test_crossfade_shortens_final_video() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let mut settings = settings(3, ContinuationPolicy::Strict, 0);
        settings.crossfade_duration = 0.5;
        let controller = controller(backend, settings);

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        let video = report.final_video.unwrap();
        // 3 clips of 10 frames, two 5-frame overlaps
        assert_eq!(video.frame_count, 20);
        assert!((video.total_duration - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let controller = controller(backend, settings(0, ContinuationPolicy::Strict, 0));

        let result = controller.run(prompt(), None, &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(crate::error::CompositorError::Pipeline(PipelineError::InvalidSettings { .. }))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_clip_fails_segment_without_retry_under_strict() {
        let backend = Arc::new(ScriptedBackend::with_replies(vec![Reply::Clip, Reply::Corrupt]));
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Strict, 2));
        let (tx, mut rx) = progress_channel();

        let report = controller.run(prompt(), Some(tx), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert!(report.final_video.is_none());
        assert_eq!(report.failed_indices(), vec![1]);
        assert_eq!(report.run.segments.len(), 2);
        assert_eq!(report.run.segments[1].attempts, 1);
        assert!(report.run.segments[1].video.is_none());
        assert_eq!(backend.video_calls(), 2);

        let events = drain(&mut rx);
        assert!(events.contains(&ProgressEvent::SegmentAttempt {
            segment_index: 1,
            attempt: 1,
            outcome: AttemptOutcome::Failed,
            error: Some(report.failures[0].reason.clone()),
        }));
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Concatenating { .. })));
    }

    #[tokio::test]
    async fn test_undecodable_clip_is_skipped_when_lenient() {
        let backend = Arc::new(ScriptedBackend::with_replies(vec![Reply::Clip, Reply::Corrupt, Reply::Clip]));
        let controller = controller(backend.clone(), settings(3, ContinuationPolicy::Lenient, 2));

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::PartiallyCompleted);
        assert_eq!(report.failed_indices(), vec![1]);
        assert_eq!(report.final_video.as_ref().unwrap().segment_count, 2);

        // segment 2 chains from segment 0, the last clip that decoded
        let seeds = backend.seed_images();
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[1], seeds[2]);
    }

    #[tokio::test]
    async fn test_seed_extraction_failure_settles_segment_as_failed() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let codec = FailingCodec { fail_last_frame: true, ..Default::default() };
        let controller = controller_with_codec(backend.clone(), codec, settings(2, ContinuationPolicy::Lenient, 2));

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert_eq!(report.failed_indices(), vec![0]);
        assert!(report.failures[0].reason.contains("no keyframe near the end"));
        assert_eq!(report.run.segments[0].attempts, 1);
        assert_eq!(backend.video_calls(), 1);
    }

    #[tokio::test]
    async fn test_final_segment_skips_seed_extraction() {
        // the last segment never chains, so a broken extractor cannot fail it
        let backend = Arc::new(ScriptedBackend::succeeding());
        let codec = FailingCodec { fail_last_frame: true, ..Default::default() };
        let controller = controller_with_codec(backend, codec, settings(1, ContinuationPolicy::Strict, 0));

        let report = controller.run(prompt(), None, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Completed);
        assert_eq!(report.final_video.unwrap().segment_count, 1);
    }

    #[tokio::test]
    async fn test_concatenation_failure_fails_run_with_error() {
        let backend = Arc::new(ScriptedBackend::succeeding());
        let codec = FailingCodec { fail_encode: true, ..Default::default() };
        let controller = controller_with_codec(backend, codec, settings(2, ContinuationPolicy::Strict, 0));
        let (tx, mut rx) = progress_channel();

        let report = controller.run(prompt(), Some(tx), &CancellationToken::new()).await.unwrap();

        assert_eq!(report.state(), RunState::Failed);
        assert!(report.final_video.is_none());
        assert!(report.failures.is_empty());
        assert!(report.run.segments.iter().all(|s| s.is_succeeded()));
        assert!(report.error.as_deref().unwrap().contains("disk full"));

        let events = drain(&mut rx);
        assert!(events.contains(&ProgressEvent::Concatenating { segment_count: 2 }));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Finished { state: RunState::Failed, failed_segments: vec![] })
        );
    }
}
