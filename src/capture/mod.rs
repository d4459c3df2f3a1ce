mod v4l_capture;

pub use v4l_capture::{NokhwaAcquirer, WebcamCapture};

use crate::error::Result;
use image::RgbImage;

/// Width and height of the raw, uncropped camera frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

impl VideoDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// What the caller asks of the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub device_index: u32,
    /// Prefer the highest frame rate over the highest resolution
    pub prefer_frame_rate: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            device_index: 0,
            prefer_frame_rate: true,
        }
    }
}

/// Trait for camera capture sources
///
/// Dropping a source stops its stream.
pub trait CaptureSource {
    /// Capture a single frame
    ///
    /// `PipelineError::StreamEnded` means the stream is gone for good; any
    /// other error only concerns this frame.
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> VideoDimensions;
}

/// Obtains live capture sources
pub trait CameraAcquirer {
    /// Open the camera and wait for its first frame
    ///
    /// Fails with `PermissionDenied` or `DeviceUnavailable`; callers do not retry.
    fn acquire(&mut self, constraints: &MediaConstraints) -> Result<Box<dyn CaptureSource>>;
}
