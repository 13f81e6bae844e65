use anyhow::{Context, Result};
use clap::Parser;
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use virtual_bg::capture::{CaptureSource, StillCapture, WebcamCapture};
use virtual_bg::compositor::Compositor;
use virtual_bg::config::{
    parse_rgba, CaptureConstraints, DrawOptions, EffectKind, FitMode, InternalResolution,
    ModelQuality, SegmentConfig,
};
use virtual_bg::control::Command;
use virtual_bg::output::V4L2Output;
use virtual_bg::scheduler::{EffectScheduler, Pipeline};
use virtual_bg::segmentation;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Use a still image as the camera (for trying effects without a webcam)
    #[arg(long)]
    input_image: Option<PathBuf>,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output (canvas) resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output (canvas) resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// Without it only the `off` effect is available
    #[arg(long)]
    model: Option<PathBuf>,

    /// Model quality tier (higher is more accurate and slower)
    #[arg(long, value_enum, default_value_t = ModelQuality::Default)]
    quality: ModelQuality,

    /// Model input size relative to the frame
    #[arg(long, value_enum, default_value_t = InternalResolution::Medium)]
    internal_resolution: InternalResolution,

    /// Coverage (0-1) above which a pixel counts as person
    #[arg(long, default_value_t = 0.7)]
    segmentation_threshold: f32,

    /// Maximum people to detect per frame
    #[arg(long, default_value_t = 4)]
    max_detections: u32,

    /// Minimum person detection score
    #[arg(long, default_value_t = 0.5)]
    score_threshold: f32,

    /// Non-maximum suppression radius in pixels
    #[arg(long, default_value_t = 20)]
    nms_radius: u32,

    /// Effect to start with
    #[arg(short, long, value_enum, default_value_t = EffectKind::Blur)]
    effect: EffectKind,

    /// Background image for the `image` effect
    #[arg(long)]
    background: Option<PathBuf>,

    /// How the background image is fitted to the canvas
    #[arg(long, value_enum, default_value_t = FitMode::Cover)]
    fit: FitMode,

    /// Opacity (0-1) of the color mask
    #[arg(long, default_value_t = 1.0)]
    opacity: f32,

    /// Color mask over the background, as r,g,b,a or #rrggbbaa
    #[arg(long, default_value = "0,0,0,220", value_parser = parse_rgba)]
    mask_color: Rgba<u8>,

    /// Color mask over the person, as r,g,b,a or #rrggbbaa
    #[arg(long, default_value = "0,0,0,0", value_parser = parse_rgba)]
    person_color: Rgba<u8>,

    /// Pixels (0-20) of feathering between person and background
    #[arg(long, default_value_t = 5)]
    edge_blur: u32,

    /// Background blur strength (1-20)
    #[arg(long, default_value_t = 15)]
    background_blur: u32,

    /// Do not mirror the picture
    #[arg(long)]
    no_mirror: bool,
}

impl Args {
    fn draw_options(&self) -> DrawOptions {
        DrawOptions {
            opacity: self.opacity,
            foreground: self.person_color,
            background: self.mask_color,
            edge_blur: self.edge_blur,
            background_blur: self.background_blur,
            mirror: !self.no_mirror,
            fit: self.fit,
        }
    }

    fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            internal_resolution: self.internal_resolution,
            segmentation_threshold: self.segmentation_threshold,
            max_detections: self.max_detections,
            score_threshold: self.score_threshold,
            nms_radius: self.nms_radius,
            // The pipeline mirrors the mask along with the frame
            ..SegmentConfig::default()
        }
    }

    fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.capture_width,
            height: self.capture_height,
            fps: self.fps,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("virtual-bg starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    let mut scheduler = match startup(&args) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            tracing::error!("Startup failed: {:#}", e);
            return Err(e);
        }
    };

    scheduler
        .start(args.effect)
        .context("Failed to start effect")?;

    run_controls(&mut scheduler, args.effect).await?;

    scheduler.stop().await?;
    tracing::info!("virtual-bg stopped");
    Ok(())
}

/// Open camera, output, model and background. Any failure halts startup.
fn startup(args: &Args) -> Result<EffectScheduler> {
    let draw_options = args.draw_options();
    draw_options.validate().context("Invalid draw options")?;
    let segment_config = args.segment_config();
    segment_config
        .validate()
        .context("Invalid segmentation options")?;

    let capture: Box<dyn CaptureSource> = match &args.input_image {
        Some(path) => Box::new(StillCapture::open(path, args.capture_width, args.capture_height)?),
        None => Box::new(
            WebcamCapture::new(args.input_device, args.capture_constraints())
                .context("Camera capture unavailable")?,
        ),
    };

    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let provider = match &args.model {
        Some(model_path) => {
            tracing::info!("Loading segmentation model from {}", model_path.display());
            let provider = segmentation::load(model_path, args.quality.into())
                .context("Failed to load segmentation model")?;
            tracing::info!("Segmentation model loaded successfully");
            Some(provider)
        }
        None => {
            tracing::info!("No segmentation model given, only the `off` effect is available");
            None
        }
    };

    let mut compositor = Compositor::new(draw_options, args.output_width, args.output_height);
    if let Some(path) = &args.background {
        compositor.set_background(load_background(path)?);
    }

    let pipeline = Pipeline::new(
        capture,
        provider,
        compositor,
        Box::new(output),
        segment_config,
    );
    Ok(EffectScheduler::new(pipeline, args.fps))
}

fn load_background(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)
        .with_context(|| format!("Failed to open background image {}", path.display()))?;
    Ok(image.to_rgba8())
}

/// Apply control commands from stdin until `quit` or Ctrl+C
async fn run_controls(scheduler: &mut EffectScheduler, mut effect: EffectKind) -> Result<()> {
    tracing::info!("Commands: effect <off|blur|color|image>, background <path>, start, stop, status, quit");
    tracing::info!("Press Ctrl+C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Interrupted");
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("Failed to read control input")? else {
                    tracing::debug!("Control input closed");
                    stdin_open = false;
                    continue;
                };

                let command = match Command::parse(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        tracing::warn!("{}", e);
                        continue;
                    }
                };

                match command {
                    Command::Effect(kind) => match scheduler.restart(kind).await {
                        Ok(()) => effect = kind,
                        Err(e) => tracing::error!("Cannot switch to {}: {:#}", kind, e),
                    },
                    Command::Background(path) => match load_background(&path) {
                        Ok(image) => {
                            scheduler.change_background(image).await;
                            // A run that stopped for lack of a background can resume now
                            if effect == EffectKind::Image && !scheduler.state().active {
                                if let Err(e) = scheduler.restart(effect).await {
                                    tracing::error!("Cannot resume {}: {:#}", effect, e);
                                }
                            }
                        }
                        Err(e) => tracing::error!("{:#}", e),
                    },
                    Command::Start => {
                        if let Err(e) = scheduler.restart(effect).await {
                            tracing::error!("Cannot start {}: {:#}", effect, e);
                        }
                    }
                    Command::Stop => {
                        if let Err(e) = scheduler.stop().await {
                            tracing::error!("Failed to stop: {:#}", e);
                        }
                    }
                    Command::Status => {
                        let state = scheduler.state();
                        tracing::info!(
                            "effect={} active={} run={} frames={} error={}",
                            state.effect.map_or_else(|| "-".to_string(), |e| e.to_string()),
                            state.active,
                            state.generation,
                            state.frames_presented,
                            state.last_error.as_deref().unwrap_or("-")
                        );
                    }
                    Command::Quit => return Ok(()),
                }
            }
        }
    }
}
