//! Per-tick frame compositing: background first, then the masked-in subject.

mod clock;

pub use clock::{FrameClock, PacedClock};

use crate::background::BackgroundCompositor;
use crate::capture::CaptureSource;
use crate::config::ProcessorConfig;
use crate::crop::{AutocropPlanner, CropRectangle};
use crate::error::{PipelineError, Result};
use crate::face::FaceAdapter;
use crate::output::OutputSink;
use crate::segmentation::{SegmentationAdapter, SegmentationMask};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frames between timing reports
const STATS_INTERVAL: u64 = 30;

/// What one tick of the render loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A new frame reached the surface
    Rendered,
    /// The frame was dropped; the surface keeps the previous one
    Skipped,
    /// The processor is not running; nothing was done
    Halted,
}

/// Everything a tick reads or drives, borrowed from the session that owns it
pub struct FrameContext<'a> {
    pub capture: &'a mut dyn CaptureSource,
    pub segmenter: &'a mut SegmentationAdapter,
    pub faces: Option<&'a mut FaceAdapter>,
    pub planner: &'a mut AutocropPlanner,
    pub background: &'a mut BackgroundCompositor,
    pub output: &'a mut dyn OutputSink,
    pub config: &'a ProcessorConfig,
}

/// Maps a canvas pixel to the source-frame pixel it shows
struct SourceMapping {
    crop: CropRectangle,
    scale_x: f64,
    scale_y: f64,
    max_x: u32,
    max_y: u32,
}

impl SourceMapping {
    fn new(crop: &CropRectangle, canvas: (u32, u32), frame: (u32, u32)) -> Self {
        Self {
            crop: *crop,
            scale_x: crop.width / canvas.0 as f64,
            scale_y: crop.height / canvas.1 as f64,
            max_x: frame.0.saturating_sub(1),
            max_y: frame.1.saturating_sub(1),
        }
    }

    #[inline]
    fn source(&self, x: u32, y: u32) -> (u32, u32) {
        let sx = self.crop.origin_x + (x as f64 + 0.5) * self.scale_x;
        let sy = self.crop.origin_y + (y as f64 + 0.5) * self.scale_y;
        (
            (sx.max(0.0) as u32).min(self.max_x),
            (sy.max(0.0) as u32).min(self.max_y),
        )
    }
}

/// Draw `background`, then the crop-selected frame pixels whose confidence exceeds `threshold`
///
/// The mask covers the full frame; it is sampled at the same source pixel as the frame.
pub fn composite(
    canvas: &mut RgbImage,
    background: &RgbImage,
    frame: &RgbImage,
    mask: &SegmentationMask,
    crop: &CropRectangle,
    threshold: f32,
) {
    debug_assert_eq!(canvas.dimensions(), background.dimensions());
    debug_assert_eq!(frame.dimensions(), mask.dimensions());

    canvas.copy_from_slice(background);

    let mapping = SourceMapping::new(crop, canvas.dimensions(), frame.dimensions());
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let (sx, sy) = mapping.source(x, y);
        if mask.confidence(sx, sy) > threshold {
            *pixel = *frame.get_pixel(sx, sy);
        }
    }
}

/// Render the crop-selected part of the mask as grayscale
pub fn matte_view(canvas: &mut RgbImage, mask: &SegmentationMask, crop: &CropRectangle) {
    let mapping = SourceMapping::new(crop, canvas.dimensions(), mask.dimensions());
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let (sx, sy) = mapping.source(x, y);
        let value = (mask.confidence(sx, sy) * 255.0).round().clamp(0.0, 255.0) as u8;
        *pixel = Rgb([value, value, value]);
    }
}

/// Running timing averages, reported every [`STATS_INTERVAL`] frames
#[derive(Debug, Default)]
struct FrameStats {
    frames: u64,
    skipped: u64,
    capture: Duration,
    segment: Duration,
    composite: Duration,
    output: Duration,
}

impl FrameStats {
    fn record(&mut self, capture: Duration, segment: Duration, composite: Duration, output: Duration) {
        self.frames += 1;
        self.capture += capture;
        self.segment += segment;
        self.composite += composite;
        self.output += output;

        if self.frames % STATS_INTERVAL == 0 {
            let avg = |total: Duration| total.as_secs_f64() * 1000.0 / self.frames as f64;
            let total_ms =
                avg(self.capture) + avg(self.segment) + avg(self.composite) + avg(self.output);
            tracing::info!(
                "Frame {}: capture={:.1}ms, segment={:.1}ms, composite={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, skipped={}",
                self.frames,
                avg(self.capture),
                avg(self.segment),
                avg(self.composite),
                avg(self.output),
                total_ms,
                1000.0 / total_ms.max(f64::EPSILON),
                self.skipped
            );
        }
    }
}

/// Owns the canvas and per-session render statistics
pub struct RenderLoop {
    canvas: RgbImage,
    stats: FrameStats,
}

impl RenderLoop {
    pub fn new(canvas_size: (u32, u32)) -> Self {
        Self {
            canvas: RgbImage::new(canvas_size.0, canvas_size.1),
            stats: FrameStats::default(),
        }
    }

    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    pub fn frames_rendered(&self) -> u64 {
        self.stats.frames
    }

    /// One tick: capture, segment, composite, write
    ///
    /// Session-fatal errors are returned; per-frame failures skip the frame.
    pub fn render(&mut self, ctx: FrameContext<'_>, timestamp_ms: u64) -> Result<FrameOutcome> {
        let _span = tracing::debug_span!("frame", timestamp_ms).entered();

        let capture_start = Instant::now();
        let frame = match ctx.capture.capture_frame() {
            Ok(frame) => Arc::new(frame),
            Err(PipelineError::StreamEnded) => return Err(PipelineError::StreamEnded),
            Err(e) => {
                tracing::warn!("Skipping frame, capture failed: {}", e);
                self.stats.skipped += 1;
                return Ok(FrameOutcome::Skipped);
            }
        };
        let capture_time = capture_start.elapsed();

        if let Some(faces) = ctx.faces {
            if ctx.planner.wants_attempt(timestamp_ms) {
                ctx.planner.attempt(faces, &frame, timestamp_ms);
            }
        }

        let segment_start = Instant::now();
        let mask = match ctx.segmenter.segment(Arc::clone(&frame), timestamp_ms) {
            Ok(mask) => mask,
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Skipping frame, segmentation failed: {}", e);
                self.stats.skipped += 1;
                return Ok(FrameOutcome::Skipped);
            }
        };
        let segment_time = segment_start.elapsed();

        let composite_start = Instant::now();
        let crop = ctx.planner.active();
        if ctx.config.show_matte {
            matte_view(&mut self.canvas, &mask, &crop);
        } else {
            let background = ctx
                .background
                .render(&frame, &crop, ctx.config.blur_radius_px);
            composite(
                &mut self.canvas,
                background,
                &frame,
                &mask,
                &crop,
                ctx.config.mask_threshold,
            );
        }
        let composite_time = composite_start.elapsed();

        let output_start = Instant::now();
        if let Err(e) = ctx.output.write_frame(&self.canvas) {
            tracing::warn!("Failed to write frame: {:#}", e);
            self.stats.skipped += 1;
            return Ok(FrameOutcome::Skipped);
        }
        let output_time = output_start.elapsed();

        self.stats
            .record(capture_time, segment_time, composite_time, output_time);
        Ok(FrameOutcome::Rendered)
    }
}
