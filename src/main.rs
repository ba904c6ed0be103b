use anyhow::{anyhow, Context, Result};
use camola_cutout::capture::{CaptureSource, ChromaOrder, Rotation, SyntheticCapture};
use camola_cutout::composite::{OrientationPolicy, Resample};
use camola_cutout::decode::ColorRange;
use camola_cutout::display::{DisplayTransformer, SurfaceGeometry};
use camola_cutout::output::{self, Backdrop, OutputSink, V4L2Output};
use camola_cutout::segmentation::{ConfidenceMask, SegmentationModel, ThreadedMaskEngine};
use camola_cutout::{FrameOutcome, FramePipelineController, PipelineConfig};
use clap::{Parser, ValueEnum};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Use the built-in test pattern instead of a webcam
    #[arg(long)]
    synthetic: bool,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,

    /// Show matte visualization (grayscale silhouette) instead of the cutout
    #[arg(long)]
    show_matte: bool,

    /// Clockwise rotation the sensor reports for its frames (0, 90, 180, 270)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    sensor_rotation: i32,

    /// Always rotate frames by this much before segmenting, ignoring the sensor
    #[arg(long, allow_hyphen_values = true)]
    fixed_rotation: Option<i32>,

    /// Display rotation in degrees applied to the cutout
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    display_rotation: f32,

    /// Override which chroma plane carries Cb
    #[arg(long, value_enum)]
    chroma_order: Option<ChromaOrderArg>,

    /// Luma/chroma quantisation range of the camera
    #[arg(long, value_enum, default_value_t = RangeArg::Limited)]
    color_range: RangeArg,

    /// Resampling used to bring frames to the mask size
    #[arg(long, value_enum, default_value_t = ResampleArg::Bilinear)]
    resample: ResampleArg,

    /// What the cutout is drawn over
    #[arg(long, value_enum, default_value_t = BackdropArg::Green)]
    backdrop: BackdropArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ChromaOrderArg {
    Cbcr,
    Crcb,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RangeArg {
    Full,
    Limited,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResampleArg {
    Nearest,
    Bilinear,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackdropArg {
    Preview,
    Green,
    Black,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let orientation = match self.fixed_rotation {
            Some(degrees) => OrientationPolicy::Fixed(parse_rotation(degrees)?),
            None => OrientationPolicy::FromHint,
        };

        Ok(PipelineConfig {
            color_range: match self.color_range {
                RangeArg::Full => ColorRange::Full,
                RangeArg::Limited => ColorRange::Limited,
            },
            chroma_order: self.chroma_order.map(|order| match order {
                ChromaOrderArg::Cbcr => ChromaOrder::CbCr,
                ChromaOrderArg::Crcb => ChromaOrder::CrCb,
            }),
            orientation,
            resample: match self.resample {
                ResampleArg::Nearest => Resample::Nearest,
                ResampleArg::Bilinear => Resample::Bilinear,
            },
            surface: SurfaceGeometry::new(
                self.output_width,
                self.output_height,
                self.display_rotation,
            ),
        })
    }

    fn backdrop(&self) -> Backdrop {
        match self.backdrop {
            BackdropArg::Preview => Backdrop::Preview,
            BackdropArg::Green => Backdrop::Solid(Rgb([0, 177, 64])),
            BackdropArg::Black => Backdrop::Solid(Rgb([0, 0, 0])),
        }
    }
}

fn parse_rotation(degrees: i32) -> Result<Rotation> {
    Rotation::from_degrees(degrees)
        .ok_or_else(|| anyhow!("Rotation must be a multiple of 90 degrees, got {}", degrees))
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

    tracing::info!("Camola cutout starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!(
        "Output: {}x{}, rotation {}",
        args.output_width,
        args.output_height,
        args.display_rotation
    );
    tracing::info!("Target FPS: {}", args.fps);

    let config = args.pipeline_config()?;
    let sensor_rotation = parse_rotation(args.sensor_rotation)?;

    // Initialize capture
    let mut capture = open_capture(&args, sensor_rotation)?;

    // Initialize output
    let mut output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    // Initialize segmentation model if provided
    let model = match &args.model {
        Some(model_path) => {
            tracing::info!("Loading segmentation model from {}", model_path);
            let model = load_model(model_path).context("Failed to load segmentation model")?;
            tracing::info!("Segmentation model loaded successfully");
            Some(model)
        }
        None => {
            tracing::info!("Running in passthrough mode (no segmentation)");
            None
        }
    };

    let settings = RunSettings {
        config,
        backdrop: args.backdrop(),
        target_fps: args.fps,
        show_matte: args.show_matte,
    };

    match model {
        Some(model) => run_pipeline(capture.as_mut(), &mut output, model, &settings),
        None => run_passthrough(capture.as_mut(), &mut output, &settings),
    }
}

fn open_capture(args: &Args, rotation: Rotation) -> Result<Box<dyn CaptureSource>> {
    if args.synthetic {
        return Ok(Box::new(SyntheticCapture::new(
            args.capture_width,
            args.capture_height,
            rotation,
        )));
    }

    #[cfg(feature = "camera")]
    {
        let capture = camola_cutout::capture::WebcamCapture::new(
            args.input_device,
            args.capture_width,
            args.capture_height,
            args.fps,
            rotation,
        )
        .context("Failed to initialize webcam capture")?;
        Ok(Box::new(capture))
    }

    #[cfg(not(feature = "camera"))]
    {
        tracing::warn!(
            "Built without the `camera` feature, using the test pattern instead of device {}",
            args.input_device
        );
        Ok(Box::new(SyntheticCapture::new(
            args.capture_width,
            args.capture_height,
            rotation,
        )))
    }
}

#[cfg(feature = "onnx")]
fn load_model(model_path: &str) -> Result<Box<dyn SegmentationModel>> {
    camola_cutout::segmentation::create_default_model(model_path)
}

#[cfg(not(feature = "onnx"))]
fn load_model(model_path: &str) -> Result<Box<dyn SegmentationModel>> {
    anyhow::bail!(
        "Cannot load {}: built without the `onnx` feature",
        model_path
    )
}

struct RunSettings {
    config: PipelineConfig,
    backdrop: Backdrop,
    target_fps: u32,
    show_matte: bool,
}

/// Keeps a copy of each mask the wrapped model produces, for `--show-matte`.
struct MatteTap {
    inner: Box<dyn SegmentationModel>,
    last: Arc<Mutex<Option<ConfidenceMask>>>,
}

impl SegmentationModel for MatteTap {
    fn segment(&mut self, frame: &RgbImage) -> Result<ConfidenceMask> {
        let mask = self.inner.segment(frame)?;
        *self.last.lock() = Some(mask.clone());
        Ok(mask)
    }

    fn reset_state(&mut self) {
        self.inner.reset_state();
    }

    fn input_size(&self) -> (u32, u32) {
        self.inner.input_size()
    }

    fn output_size(&self) -> (u32, u32) {
        self.inner.output_size()
    }
}

fn run_pipeline(
    capture: &mut dyn CaptureSource,
    output: &mut dyn OutputSink,
    model: Box<dyn SegmentationModel>,
    settings: &RunSettings,
) -> Result<()> {
    let config = &settings.config;
    let matte = Arc::new(Mutex::new(None));
    let model: Box<dyn SegmentationModel> = if settings.show_matte {
        Box::new(MatteTap {
            inner: model,
            last: matte.clone(),
        })
    } else {
        model
    };

    let engine = ThreadedMaskEngine::spawn(model)?;
    let transformer = Arc::new(DisplayTransformer::new(config.surface));
    let controller = FramePipelineController::new(
        config.decoder(),
        config.compositor(),
        transformer.clone(),
        engine,
    );

    // The renderer decodes its own preview; the controller's raster stays private.
    let preview_decoder = config.decoder();
    let preview_compositor = config.compositor();
    let (out_width, out_height) = output.resolution();

    let frame_duration = Duration::from_secs_f32(1.0 / settings.target_fps.max(1) as f32);
    let mut stats = LoopStats::default();

    tracing::info!("Starting main pipeline loop, show_matte={}", settings.show_matte);
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let frame = capture.capture_frame().context("Failed to capture frame")?;
        stats.capture += capture_start.elapsed();

        let preview = match settings.backdrop {
            Backdrop::Preview => preview_decoder
                .decode(&frame)
                .ok()
                .map(|raster| preview_compositor.orient(raster, frame.rotation())),
            Backdrop::Solid(_) => None,
        };

        let segment_start = Instant::now();
        match controller.on_frame(frame) {
            FrameOutcome::Skipped { .. } => stats.skipped += 1,
            FrameOutcome::Dropped { .. } => stats.dropped += 1,
            _ => {}
        }
        for outcome in controller.drain() {
            match outcome {
                FrameOutcome::Published { .. } => stats.published += 1,
                FrameOutcome::Dropped { .. } => stats.dropped += 1,
                _ => {}
            }
        }
        stats.segment += segment_start.elapsed();

        let output_start = Instant::now();
        let output_frame = if settings.show_matte {
            matte
                .lock()
                .as_ref()
                .map(|mask: &ConfidenceMask| matte_frame(mask, out_width, out_height))
        } else {
            transformer
                .latest()
                .map(|presentation| output::flatten(&presentation.raster, settings.backdrop, preview.as_ref()))
        };
        if let Some(output_frame) = output_frame {
            output
                .write_frame(&output_frame)
                .context("Failed to write frame")?;
        }
        stats.output += output_start.elapsed();

        stats.frames += 1;
        if stats.frames % 30 == 0 {
            stats.log();
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}

fn run_passthrough(
    capture: &mut dyn CaptureSource,
    output: &mut dyn OutputSink,
    settings: &RunSettings,
) -> Result<()> {
    let decoder = settings.config.decoder();
    let compositor = settings.config.compositor();
    let frame_duration = Duration::from_secs_f32(1.0 / settings.target_fps.max(1) as f32);
    let mut stats = LoopStats::default();

    tracing::info!("Starting passthrough loop");

    loop {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let frame = capture.capture_frame().context("Failed to capture frame")?;
        stats.capture += capture_start.elapsed();

        let output_start = Instant::now();
        match decoder.decode(&frame) {
            Ok(raster) => {
                let upright = compositor.orient(raster, frame.rotation());
                drop(frame);
                output
                    .write_frame(&upright)
                    .context("Failed to write frame")?;
            }
            Err(e) => {
                stats.dropped += 1;
                tracing::warn!("Frame {} dropped: {}", frame.sequence(), e);
            }
        }
        stats.output += output_start.elapsed();

        stats.frames += 1;
        if stats.frames % 30 == 0 {
            stats.log();
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}

fn matte_frame(mask: &ConfidenceMask, width: u32, height: u32) -> RgbImage {
    let gray = DynamicImage::ImageLuma8(mask.to_luma()).to_rgb8();
    imageops::resize(&gray, width, height, imageops::FilterType::Triangle)
}

#[derive(Default)]
struct LoopStats {
    frames: u64,
    published: u64,
    skipped: u64,
    dropped: u64,
    capture: Duration,
    segment: Duration,
    output: Duration,
}

impl LoopStats {
    fn log(&self) {
        let per_frame = |d: Duration| d.as_secs_f64() * 1000.0 / self.frames as f64;
        let (capture_ms, segment_ms, output_ms) =
            (per_frame(self.capture), per_frame(self.segment), per_frame(self.output));
        let total_ms = capture_ms + segment_ms + output_ms;

        tracing::info!(
            "Frame {}: capture={:.1}ms, pipeline={:.1}ms, output={:.1}ms, fps={:.1}, published={}, skipped={}, dropped={}",
            self.frames,
            capture_ms,
            segment_ms,
            output_ms,
            1000.0 / total_ms,
            self.published,
            self.skipped,
            self.dropped
        );
    }
}
