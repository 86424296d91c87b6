use anyhow::{Context, Result};
use clap::Parser;
use image::Rgb;
use live_backdrop::capture::WebcamCapture;
use live_backdrop::config::{
    parse_hex_color, CompositingConfig, ConfigStore, DeviceProfile, EdgeQuality, GradientPreset,
    ModeKind, PreviewView,
};
use live_backdrop::controls;
use live_backdrop::output::V4L2Output;
use live_backdrop::pipeline::{LogTelemetry, Pipeline, PipelineOptions};
use live_backdrop::segmentation::{default_model_loader, SegmentationAdapter};
use live_backdrop::{BackgroundImage, Compositor};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width (capped by the device profile)
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height (capped by the device profile)
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second (default from the device profile)
    #[arg(long)]
    fps: Option<u32>,

    /// Drive loop ticks per second
    #[arg(long, default_value_t = 60)]
    tick_rate: u32,

    /// Hardware class
    #[arg(long, value_enum, default_value_t = DeviceProfile::Standard)]
    profile: DeviceProfile,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<PathBuf>,

    /// Background mode
    #[arg(long, value_enum, default_value_t = ModeKind::Gradient)]
    mode: ModeKind,

    /// Blur strength for blur mode, 0-100
    #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u32).range(0..=100))]
    blur_strength: u32,

    /// Solid background color
    #[arg(long, default_value = "#1f2937", value_parser = parse_hex_color)]
    color: Rgb<u8>,

    /// Gradient preset
    #[arg(long, value_enum, default_value_t = GradientPreset::PurpleBlue)]
    gradient: GradientPreset,

    /// Background image for image mode
    #[arg(long)]
    background_image: Option<PathBuf>,

    /// Mirror the presented video
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    mirror: bool,

    /// Smooth mask edges before blending
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    smooth_edges: bool,

    /// Edge smoothing kernel
    #[arg(long, value_enum, default_value_t = EdgeQuality::Medium)]
    edge_quality: EdgeQuality,

    /// Grow (positive) or shrink (negative) the foreground before smoothing
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    edge_adjust: i32,

    /// What to show: composited output, the raw camera or the mask
    #[arg(long, value_enum, default_value_t = PreviewView::Processed)]
    view: PreviewView,
}

impl Args {
    fn compositing_config(&self) -> Result<CompositingConfig> {
        let image = match &self.background_image {
            Some(path) => Some(Arc::new(
                BackgroundImage::load(path).context("Failed to load background image")?,
            )),
            None => None,
        };

        let mut config = CompositingConfig {
            mode: self.mode,
            solid_color: self.color,
            gradient: self.gradient,
            image,
            mirror: self.mirror,
            smooth_edges: self.smooth_edges,
            edge_quality: self.edge_quality,
            view: self.view,
            ..Default::default()
        };
        config.set_blur_strength(self.blur_strength);
        config.set_edge_adjust(self.edge_adjust);
        Ok(config)
    }
}

fn main() -> Result<()> {
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

    let (capture_width, capture_height) =
        args.profile.capture_size(args.capture_width, args.capture_height);
    let target_fps = args.fps.unwrap_or_else(|| args.profile.target_fps());

    tracing::info!("live-backdrop starting ({:?} profile)", args.profile);
    tracing::info!("Capture: up to {}x{}", capture_width, capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", target_fps);

    let store = ConfigStore::new(args.compositing_config()?);
    tracing::info!("{}", controls::describe(&store.snapshot()));

    // Initialize capture
    let capture = WebcamCapture::new(args.input_device, capture_width, capture_height)
        .context("Failed to initialize webcam capture")?;

    // Initialize output
    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    // The model loads on the segmentation thread; frames pass through until it is ready
    let compositor = match &args.model {
        Some(model_path) => {
            tracing::info!("Segmentation model: {}", model_path.display());
            Compositor::new(Some(SegmentationAdapter::new(default_model_loader(model_path))))
        }
        None => Compositor::passthrough(),
    };

    let mut pipeline = Pipeline::new(
        capture,
        output,
        compositor,
        store.clone(),
        PipelineOptions {
            target_fps,
            tick_rate: args.tick_rate,
        },
    )
    .with_telemetry(LogTelemetry::default());

    controls::spawn_stdin_controls(store, pipeline.stop_handle())
        .context("Failed to start control thread")?;
    tracing::info!("Type commands on stdin ('quit' to stop); {}", controls::HELP);

    pipeline.start().context("Failed to start segmentation")?;
    pipeline.run().context("Pipeline stopped")?;

    tracing::info!("live-backdrop stopped");
    Ok(())
}
