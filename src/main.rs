use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use longform_compositor::{
    config::Config,
    generation::{GenerationRequest, SegmentGenerator, StabilityClient},
    pipeline::{ContinuationPolicy, PipelineController, ProgressEvent, RunReport, RunState},
    video::{
        codec::CodecKind, concat::parse_concat_order, container_extension, is_png_stream, Concatenator,
        FfmpegCodec,
    },
    CompositorError,
};

#[derive(Parser)]
#[command(
    name = "longform-compositor",
    version,
    about = "Generate long videos by chaining short AI-generated clips",
    long_about = "Longform-Compositor generates a sequence of short clips, seeding each one from the last frame of the previous clip, and stitches them into a single video with optional crossfades."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a chained longform video
    Generate(GenerateArgs),

    /// Concatenate existing clips with crossfades
    Concat(ConcatArgs),

    /// Write the default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = "longform.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Text prompt for the first segment
    #[arg(short, long, conflicts_with = "image", required_unless_present = "image")]
    prompt: Option<String>,

    /// Seed image for the first segment
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Number of segments to generate
    #[arg(short = 'n', long)]
    segments: Option<usize>,

    /// Crossfade between segments in seconds (0 = hard cut)
    #[arg(long)]
    crossfade: Option<f64>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Skip failed segments instead of aborting the run
    #[arg(long)]
    lenient: bool,

    /// Additional attempts per segment after a failure
    #[arg(long)]
    max_retries: Option<u32>,

    /// Fixed generation seed
    #[arg(long)]
    seed: Option<u32>,

    /// Guidance scale (0-35)
    #[arg(long)]
    cfg_scale: Option<f64>,

    /// Motion strength (1-255)
    #[arg(long)]
    motion: Option<f64>,

    /// Codec backend (ffmpeg or apng); inferred from the output extension if unset
    #[arg(long)]
    codec: Option<CodecKind>,

    /// Output video file path
    #[arg(short, long)]
    output: PathBuf,

    /// Also write every successful segment into this directory
    #[arg(long)]
    segments_dir: Option<PathBuf>,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key; falls back to the environment variable named in the config
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Args)]
struct ConcatArgs {
    /// Clips to join, in order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// 1-based clip order, e.g. "2,1,3"
    #[arg(long)]
    order: Option<String>,

    /// Crossfade between clips in seconds (0 = hard cut)
    #[arg(long)]
    crossfade: Option<f64>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Codec backend (ffmpeg or apng); inferred from the output extension if unset
    #[arg(long)]
    codec: Option<CodecKind>,

    /// Output video file path
    #[arg(short, long)]
    output: PathBuf,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Longform-Compositor v{}", env!("CARGO_PKG_VERSION"));

    let outcome = match cli.command {
        Command::Generate(args) => generate(args).await,
        Command::Concat(args) => concat(args).await,
        Command::InitConfig { path, force } => init_config(&path, force),
    };

    if let Err(err) = &outcome {
        if let Some(compositor_err) = err.downcast_ref::<CompositorError>() {
            error!("{}", compositor_err.user_message());
        }
    }
    outcome
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };
    Ok(config)
}

fn configure_threads(threads: usize) {
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
        warn!("Could not size the processing pool: {}", e);
    } else {
        debug!("Processing pool: {} threads", threads);
    }
}

fn pick_codec(requested: Option<CodecKind>, configured: CodecKind, output: &Path) -> CodecKind {
    requested.unwrap_or(match CodecKind::for_path(output) {
        CodecKind::Apng => CodecKind::Apng,
        CodecKind::Ffmpeg => configured,
    })
}

fn require_ffmpeg(reason: &str) -> Result<()> {
    if !FfmpegCodec::check_ffmpeg_available() {
        anyhow::bail!("FFmpeg is not installed or not on PATH; it is needed to {}", reason);
    }
    Ok(())
}

async fn generate(args: GenerateArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    // Command-line flags override file values
    if let Some(segments) = args.segments {
        config.pipeline.total_segments = segments;
    }
    if let Some(crossfade) = args.crossfade {
        config.video.crossfade_duration = crossfade;
    }
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if args.lenient {
        config.pipeline.continuation = ContinuationPolicy::Lenient;
    }
    if let Some(max_retries) = args.max_retries {
        config.pipeline.retry.max_retries = max_retries;
    }
    if let Some(seed) = args.seed {
        config.generation.seed = Some(seed);
    }
    if let Some(cfg_scale) = args.cfg_scale {
        config.generation.cfg_scale = cfg_scale;
    }
    if let Some(motion) = args.motion {
        config.generation.motion_strength = motion;
    }
    config.validate()?;
    configure_threads(config.video.processing_threads);

    // Generated segments arrive as MP4 whatever the output format
    require_ffmpeg("decode the generated MP4 segments")?;
    let codec_kind = pick_codec(args.codec, config.video.codec, &args.output);
    let codec = codec_kind.build(config.video.quality);

    let api_key = match args.api_key {
        Some(key) => key,
        None => config.api.api_key_from_env()?,
    };
    let client = StabilityClient::new(&config.api, api_key).map_err(CompositorError::from)?;
    let generator = SegmentGenerator::new(Arc::new(client), config.video.resolution());

    let initial = match (&args.prompt, &args.image) {
        (Some(prompt), _) => GenerationRequest::from_prompt(prompt.clone(), &config.generation),
        (None, Some(image)) => {
            let bytes = tokio::fs::read(image)
                .await
                .with_context(|| format!("cannot read seed image {:?}", image))?;
            GenerationRequest::from_image(bytes, &config.generation)
        }
        (None, None) => anyhow::bail!("either --prompt or --image is required"),
    };

    info!("Output: {:?}", args.output);
    info!(
        "Segments: {}, crossfade {}s @ {}fps, codec {}",
        config.pipeline.total_segments,
        config.video.crossfade_duration,
        config.video.fps,
        codec.name()
    );

    let controller = Arc::new(PipelineController::new(generator, codec.clone(), config.pipeline_settings()));
    let mut handle = controller.spawn(initial);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = handle.progress.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                warn!("Interrupt received, cancelling after the current step...");
                handle.cancel();
                cancel_requested = true;
            }
        }
    }

    let report = handle.join().await?;

    if let Some(dir) = &args.segments_dir {
        write_segments(&report, dir).await?;
    }

    if let Some(video) = &report.final_video {
        if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&args.output, &video.bytes)
            .await
            .with_context(|| format!("cannot write {:?}", args.output))?;
        info!(
            "Generation complete! {:.2}s video saved to: {:?}",
            video.total_duration, args.output
        );
    }

    print_summary(&report);

    if report.state() == RunState::Failed {
        anyhow::bail!("run failed");
    }
    Ok(())
}

async fn concat(args: ConcatArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    configure_threads(config.video.processing_threads);

    let crossfade = args.crossfade.unwrap_or(config.video.crossfade_duration);
    let fps = args.fps.unwrap_or(config.video.fps);
    let codec_kind = pick_codec(args.codec, config.video.codec, &args.output);
    if codec_kind == CodecKind::Ffmpeg {
        require_ffmpeg("encode MP4 output (write a .apng file or pass --codec apng instead)")?;
    }

    let order: Vec<usize> = match &args.order {
        Some(order) => match parse_concat_order(order, args.inputs.len()) {
            Ok(order) => order,
            Err(e) => {
                warn!("Invalid order '{}' ({}), using the given order", order, e);
                (0..args.inputs.len()).collect()
            }
        },
        None => (0..args.inputs.len()).collect(),
    };

    let mut clips = Vec::with_capacity(order.len());
    for &index in &order {
        let path = &args.inputs[index];
        info!("Reading clip {}: {:?}", index + 1, path);
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read clip {:?}", path))?;
        if !is_png_stream(&bytes) {
            require_ffmpeg(&format!("decode {:?}", path))?;
        }
        clips.push(bytes);
    }

    let concatenator = Concatenator::new(codec_kind.build(config.video.quality));
    info!("Concatenating {} clips with {}s crossfade @ {}fps", clips.len(), crossfade, fps);
    let video = tokio::task::spawn_blocking(move || concatenator.concatenate(&clips, crossfade, fps))
        .await
        .context("concatenation task panicked")?
        .map_err(CompositorError::from)?;

    tokio::fs::write(&args.output, &video.bytes)
        .await
        .with_context(|| format!("cannot write {:?}", args.output))?;
    info!(
        "Concatenation complete! {:.2}s ({} frames) saved to: {:?}",
        video.total_duration, video.frame_count, args.output
    );
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }
    Config::default().save_to_file(path)?;
    info!("Default configuration written to {:?}", path);
    Ok(())
}

fn log_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::SegmentAttempt { error: Some(_), .. } => warn!("{}", event),
        ProgressEvent::Finished { state: RunState::Failed, .. } => warn!("{}", event),
        _ => info!("{}", event),
    }
}

async fn write_segments(report: &RunReport, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    for segment in report.run.successful_segments() {
        if let Some(video) = &segment.video {
            let path = dir.join(format!("segment_{:03}.{}", segment.index + 1, container_extension(video)));
            tokio::fs::write(&path, video).await?;
            debug!("Wrote {:?}", path);
        }
    }
    info!("Segments saved to {:?}", dir);
    Ok(())
}

fn print_summary(report: &RunReport) {
    let succeeded = report.run.successful_segments().count();
    info!(
        "Run {}: {}/{} segments succeeded{}",
        report.state(),
        succeeded,
        report.run.total_segments,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for failure in &report.failures {
        warn!("Segment {} failed: {}", failure.segment_index + 1, failure.reason);
    }
    if let Some(err) = &report.error {
        error!("Run error: {}", err);
    }
}
