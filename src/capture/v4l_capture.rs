use super::{CameraAcquirer, CaptureSource, MediaConstraints, VideoDimensions};
use crate::error::{PipelineError, Result};
use anyhow::anyhow;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::{Camera, NokhwaError};

/// Consecutive read failures after which the stream is considered gone
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

pub struct WebcamCapture {
    camera: Camera,
    dimensions: VideoDimensions,
    /// First frame, decoded while waiting for the stream's real dimensions
    primed: Option<RgbImage>,
    consecutive_failures: u32,
}

impl WebcamCapture {
    pub fn open(constraints: &MediaConstraints) -> Result<Self> {
        tracing::info!("Requesting webcam {}", constraints.device_index);

        let index = CameraIndex::Index(constraints.device_index);
        let format_type = if constraints.prefer_frame_rate {
            RequestedFormatType::AbsoluteHighestFrameRate
        } else {
            RequestedFormatType::AbsoluteHighestResolution
        };
        let requested = RequestedFormat::new::<RgbFormat>(format_type);

        let mut camera = Camera::new(index, requested).map_err(classify_open_error)?;
        camera.open_stream().map_err(classify_open_error)?;

        // Metadata is only trusted once a real frame has been decoded
        let first = match read_frame(&mut camera) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = camera.stop_stream();
                return Err(PipelineError::DeviceUnavailable(format!(
                    "camera opened but produced no frame: {e}"
                )));
            }
        };
        let dimensions = VideoDimensions::new(first.width(), first.height());

        tracing::info!(
            "Webcam ready at {}x{} @ {} fps",
            dimensions.width,
            dimensions.height,
            camera.frame_rate()
        );

        Ok(Self {
            camera,
            dimensions,
            primed: Some(first),
            consecutive_failures: 0,
        })
    }
}

fn read_frame(camera: &mut Camera) -> anyhow::Result<RgbImage> {
    let frame = camera.frame().map_err(|e| anyhow!("failed to capture frame: {e}"))?;
    let decoded = frame
        .decode_image::<RgbFormat>()
        .map_err(|e| anyhow!("failed to decode frame: {e}"))?;
    let (width, height) = (decoded.width(), decoded.height());
    RgbImage::from_raw(width, height, decoded.into_raw())
        .ok_or_else(|| anyhow!("decoded frame buffer does not match {width}x{height}"))
}

fn classify_open_error(error: NokhwaError) -> PipelineError {
    let message = error.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("access denied") || lower.contains("eacces") {
        PipelineError::PermissionDenied(message)
    } else {
        PipelineError::DeviceUnavailable(message)
    }
}

fn is_device_gone(error: &anyhow::Error) -> bool {
    let lower = error.to_string().to_ascii_lowercase();
    lower.contains("no such device") || lower.contains("enodev")
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        if let Some(frame) = self.primed.take() {
            return Ok(frame);
        }

        match read_frame(&mut self.camera) {
            Ok(frame) => {
                self.consecutive_failures = 0;
                Ok(frame)
            }
            Err(e) if is_device_gone(&e) => {
                tracing::warn!("Camera disappeared: {e}");
                Err(PipelineError::StreamEnded)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::warn!(
                        "Camera failed {} frames in a row, treating stream as ended",
                        self.consecutive_failures
                    );
                    return Err(PipelineError::StreamEnded);
                }
                Err(e.into())
            }
        }
    }

    fn resolution(&self) -> VideoDimensions {
        self.dimensions
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        match self.camera.stop_stream() {
            Ok(()) => tracing::info!("Webcam stream released"),
            Err(e) => tracing::warn!("Failed to stop webcam stream cleanly: {e}"),
        }
    }
}

/// Opens local cameras through nokhwa
#[derive(Debug, Default)]
pub struct NokhwaAcquirer;

impl CameraAcquirer for NokhwaAcquirer {
    fn acquire(&mut self, constraints: &MediaConstraints) -> Result<Box<dyn CaptureSource>> {
        let capture = WebcamCapture::open(constraints)?;
        Ok(Box::new(capture))
    }
}
