#![allow(dead_code)]

use anyhow::anyhow;
use backdrop::background::AssetLoader;
use backdrop::capture::{CameraAcquirer, CaptureSource, MediaConstraints, VideoDimensions};
use backdrop::face::{FaceBox, FaceLocator, FaceLocatorFactory};
use backdrop::output::OutputSink;
use backdrop::render::FrameClock;
use backdrop::segmentation::{SegmentationMask, SegmentationModel, SegmenterFactory};
use backdrop::{Backends, Delegate, PipelineError, StopHandle};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CAMERA_COLOR: Rgb<u8> = Rgb([200, 150, 100]);

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

// ---------------------------------------------------------------- camera

#[derive(Debug, Default)]
pub struct CameraStats {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub frames: AtomicUsize,
}

impl CameraStats {
    pub fn acquired(&self) -> usize {
        count(&self.acquired)
    }

    pub fn released(&self) -> usize {
        count(&self.released)
    }
}

pub struct MockCamera {
    pub width: u32,
    pub height: u32,
    pub deny_permission: bool,
    /// Frames each source delivers before its stream ends
    pub end_after: Option<usize>,
    pub stats: Arc<CameraStats>,
}

impl MockCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            deny_permission: false,
            end_after: None,
            stats: Arc::default(),
        }
    }
}

impl CameraAcquirer for MockCamera {
    fn acquire(&mut self, _constraints: &MediaConstraints) -> backdrop::Result<Box<dyn CaptureSource>> {
        if self.deny_permission {
            return Err(PipelineError::PermissionDenied("user dismissed the prompt".into()));
        }
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSource {
            dimensions: VideoDimensions::new(self.width, self.height),
            remaining: self.end_after,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MockSource {
    dimensions: VideoDimensions,
    remaining: Option<usize>,
    stats: Arc<CameraStats>,
}

impl CaptureSource for MockSource {
    fn capture_frame(&mut self) -> backdrop::Result<RgbImage> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(PipelineError::StreamEnded);
            }
            *remaining -= 1;
        }
        self.stats.frames.fetch_add(1, Ordering::SeqCst);
        Ok(RgbImage::from_pixel(
            self.dimensions.width,
            self.dimensions.height,
            CAMERA_COLOR,
        ))
    }

    fn resolution(&self) -> VideoDimensions {
        self.dimensions
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------- segmentation

#[derive(Debug, Default)]
pub struct SegmenterStats {
    pub created: AtomicUsize,
    pub released: AtomicUsize,
    pub calls: AtomicUsize,
    pub busy: AtomicBool,
    pub overlapped: AtomicBool,
    pub delegates: Mutex<Vec<Delegate>>,
    pub timestamps: Mutex<Vec<u64>>,
}

impl SegmenterStats {
    pub fn created(&self) -> usize {
        count(&self.created)
    }

    pub fn released(&self) -> usize {
        count(&self.released)
    }

    pub fn calls(&self) -> usize {
        count(&self.calls)
    }
}

pub struct MockSegmenter {
    pub confidence: f32,
    pub failing_delegates: Vec<Delegate>,
    /// 1-based call numbers that fail
    pub failing_calls: HashSet<usize>,
    pub stats: Arc<SegmenterStats>,
}

impl MockSegmenter {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence,
            failing_delegates: Vec::new(),
            failing_calls: HashSet::new(),
            stats: Arc::default(),
        }
    }
}

impl SegmenterFactory for MockSegmenter {
    fn create(&self, delegate: Delegate) -> anyhow::Result<Box<dyn SegmentationModel>> {
        self.stats.delegates.lock().unwrap().push(delegate);
        if self.failing_delegates.contains(&delegate) {
            return Err(anyhow!("{delegate:?} delegate unavailable"));
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            confidence: self.confidence,
            failing_calls: self.failing_calls.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MockEngine {
    confidence: f32,
    failing_calls: HashSet<usize>,
    stats: Arc<SegmenterStats>,
}

impl SegmentationModel for MockEngine {
    fn segment(&mut self, frame: &RgbImage, timestamp_ms: u64) -> anyhow::Result<SegmentationMask> {
        if self.stats.busy.swap(true, Ordering::SeqCst) {
            self.stats.overlapped.store(true, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(1));

        let call = self.stats.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.timestamps.lock().unwrap().push(timestamp_ms);
        let result = if self.failing_calls.contains(&call) {
            Err(anyhow!("inference failed on call {call}"))
        } else {
            let (width, height) = frame.dimensions();
            Ok(SegmentationMask::filled(width, height, self.confidence))
        };

        self.stats.busy.store(false, Ordering::SeqCst);
        result
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ------------------------------------------------------------------ faces

#[derive(Debug, Default)]
pub struct FaceStats {
    pub created: AtomicUsize,
    pub released: AtomicUsize,
    pub detections: AtomicUsize,
}

impl FaceStats {
    pub fn detections(&self) -> usize {
        count(&self.detections)
    }

    pub fn released(&self) -> usize {
        count(&self.released)
    }
}

pub struct MockFaces {
    pub faces: Vec<FaceBox>,
    pub broken: bool,
    pub stats: Arc<FaceStats>,
}

impl MockFaces {
    pub fn with(faces: Vec<FaceBox>) -> Self {
        Self {
            faces,
            broken: false,
            stats: Arc::default(),
        }
    }

    pub fn broken() -> Self {
        Self {
            faces: Vec::new(),
            broken: true,
            stats: Arc::default(),
        }
    }
}

impl FaceLocatorFactory for MockFaces {
    fn create(&self, delegate: Delegate) -> anyhow::Result<Box<dyn FaceLocator>> {
        if self.broken {
            return Err(anyhow!("face model missing on {delegate:?}"));
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLocator {
            faces: self.faces.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MockLocator {
    faces: Vec<FaceBox>,
    stats: Arc<FaceStats>,
}

impl FaceLocator for MockLocator {
    fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<FaceBox>> {
        self.stats.detections.fetch_add(1, Ordering::SeqCst);
        Ok(self.faces.clone())
    }
}

impl Drop for MockLocator {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn face_at(x: f64, y: f64, size: f64) -> FaceBox {
    FaceBox {
        origin_x: x,
        origin_y: y,
        width: size,
        height: size,
        confidence: 0.95,
    }
}

// ----------------------------------------------------------------- assets

pub struct MockAssets(pub Option<DynamicImage>);

impl AssetLoader for MockAssets {
    fn load(&self, url: &str) -> anyhow::Result<DynamicImage> {
        self.0.clone().ok_or_else(|| anyhow!("404 Not Found: {url}"))
    }
}

/// Requests a stop from inside `load`, on its `stop_on_call`-th call (1-based)
pub struct StoppingAssets {
    pub handle: Arc<Mutex<Option<StopHandle>>>,
    pub stop_on_call: usize,
    pub calls: AtomicUsize,
}

impl StoppingAssets {
    pub fn new(stop_on_call: usize) -> Self {
        Self {
            handle: Arc::default(),
            stop_on_call,
            calls: AtomicUsize::new(0),
        }
    }
}

impl AssetLoader for StoppingAssets {
    fn load(&self, url: &str) -> anyhow::Result<DynamicImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.stop_on_call {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.request_stop();
            }
        }
        Err(anyhow!("slow download of {url} interrupted"))
    }
}

// ----------------------------------------------------------------- output

#[derive(Clone, Default)]
pub struct MemorySink {
    pub frames: Arc<Mutex<Vec<RgbImage>>>,
}

impl MemorySink {
    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<RgbImage> {
        self.frames.lock().unwrap().last().cloned()
    }
}

impl OutputSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        self.last().map_or((0, 0), |frame| frame.dimensions())
    }
}

// ------------------------------------------------------------------ clock

/// Fixed-step clock that can request a stop after a number of ticks
pub struct ManualClock {
    pub now_ms: u64,
    pub step_ms: u64,
    pub ticks: usize,
    pub stop_after: Option<(usize, StopHandle)>,
}

impl ManualClock {
    pub fn new(step_ms: u64) -> Self {
        Self {
            now_ms: 0,
            step_ms,
            ticks: 0,
            stop_after: None,
        }
    }
}

impl FrameClock for ManualClock {
    fn next_tick(&mut self) -> u64 {
        self.ticks += 1;
        self.now_ms += self.step_ms;
        if let Some((limit, handle)) = &self.stop_after {
            if self.ticks >= *limit {
                handle.request_stop();
            }
        }
        self.now_ms
    }
}

// -------------------------------------------------------------- assembly

pub fn backends(
    camera: MockCamera,
    segmenter: MockSegmenter,
    faces: Option<MockFaces>,
    assets: impl AssetLoader + 'static,
    sink: MemorySink,
) -> Backends {
    Backends {
        camera: Box::new(camera),
        segmenter: Box::new(segmenter),
        faces: faces.map(|faces| Box::new(faces) as Box<dyn FaceLocatorFactory>),
        assets: Box::new(assets),
        output: Box::new(sink),
        constraints: MediaConstraints::default(),
    }
}
