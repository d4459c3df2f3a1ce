use anyhow::{Context, Result};
use backdrop::background::UrlAssetLoader;
use backdrop::capture::{MediaConstraints, NokhwaAcquirer};
use backdrop::config::parse_hex_color;
use backdrop::face::{FaceLocatorFactory, UltraFaceFactory};
use backdrop::output::V4L2Output;
use backdrop::render::PacedClock;
use backdrop::segmentation::RvmFactory;
use backdrop::{AspectRatio, BackgroundSource, Backends, Delegate, ProcessorConfig, VideoProcessor};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Output resolution width (defaults to height times the aspect ratio)
    #[arg(long)]
    output_width: Option<u32>,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Path to the RobustVideoMatting model (ONNX file)
    #[arg(long, default_value = "models/rvm_mobilenetv3_fp32.onnx")]
    segmentation_model: PathBuf,

    /// Path to the UltraFace model (ONNX file); autocrop is off without it
    #[arg(long)]
    face_model: Option<PathBuf>,

    /// Background: "blur", "none", or an image URL or path
    #[arg(long)]
    background: Option<BackgroundSource>,

    /// Gaussian blur radius in pixels for the blur background
    #[arg(long)]
    blur_radius: Option<u32>,

    /// Foreground confidence threshold in [0, 1]
    #[arg(long)]
    mask_threshold: Option<f32>,

    /// Output aspect ratio: square, landscape, portrait, W:H or a decimal
    #[arg(long)]
    aspect_ratio: Option<AspectRatio>,

    /// Inference delegate (cpu or gpu)
    #[arg(long)]
    delegate: Option<Delegate>,

    /// Solid fill color as RRGGBB
    #[arg(long, value_parser = parse_fill_color)]
    fill_color: Option<[u8; 3]>,

    /// TOML config file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn parse_fill_color(s: &str) -> std::result::Result<[u8; 3], String> {
    parse_hex_color(s).map_err(|e| e.to_string())
}

impl Args {
    fn processor_config(&self) -> Result<ProcessorConfig> {
        let mut config = match &self.config {
            Some(path) => ProcessorConfig::load(path)?,
            None => ProcessorConfig::default(),
        };

        if let Some(background) = &self.background {
            config.background = background.clone();
        }
        if let Some(radius) = self.blur_radius {
            config.blur_radius_px = radius;
        }
        if let Some(threshold) = self.mask_threshold {
            config.mask_threshold = threshold;
        }
        if let Some(ratio) = self.aspect_ratio {
            config.aspect_ratio = ratio;
        }
        if let Some(delegate) = self.delegate {
            config.delegate = delegate;
        }
        if let Some(fill) = self.fill_color {
            config.fill_color = fill;
        }
        if self.show_matte {
            config.show_matte = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Explicit width, or the height scaled by the aspect ratio rounded to an even number
    fn output_width(&self, ratio: AspectRatio) -> u32 {
        self.output_width.unwrap_or_else(|| {
            let width = (self.output_height as f64 * ratio.value()).round() as u32;
            (width + 1) & !1
        })
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

    let config = args.processor_config()?;
    let output_width = args.output_width(config.aspect_ratio);

    tracing::info!("Backdrop starting");
    tracing::info!("Output: {}x{}", output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);
    tracing::info!("Background: {:?}, aspect {}", config.background, config.aspect_ratio);

    let output = V4L2Output::new(&args.output_device, output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let faces = args
        .face_model
        .as_ref()
        .map(|path| Box::new(UltraFaceFactory::new(path)) as Box<dyn FaceLocatorFactory>);
    if faces.is_none() {
        tracing::info!("No face model given, autocrop disabled");
    }

    let backends = Backends {
        camera: Box::new(NokhwaAcquirer),
        segmenter: Box::new(RvmFactory::new(&args.segmentation_model)),
        faces,
        assets: Box::new(UrlAssetLoader::new()?),
        output: Box::new(output),
        constraints: MediaConstraints {
            device_index: args.input_device,
            ..MediaConstraints::default()
        },
    };

    let mut processor = VideoProcessor::new(config, backends)?;

    let stop = processor.stop_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Ctrl+C received, stopping");
        stop.request_stop();
    })
    .context("Failed to install Ctrl+C handler")?;

    processor.start()?;
    tracing::info!("Press Ctrl+C to stop");

    let mut clock = PacedClock::new(args.fps);
    processor.run(&mut clock)?;

    tracing::info!("Backdrop stopped");
    Ok(())
}
