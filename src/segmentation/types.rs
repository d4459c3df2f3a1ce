use crate::config::Delegate;
use anyhow::Result;
use image::RgbImage;

/// Per-pixel foreground confidence for one full, uncropped frame
///
/// 0.0 = background, 1.0 = foreground, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl SegmentationMask {
    /// Returns `None` when `data` does not hold `width * height` values
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self { width, height, data })
    }

    pub fn filled(width: u32, height: u32, confidence: f32) -> Self {
        Self {
            width,
            height,
            data: vec![confidence; width as usize * height as usize],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn confidence(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
///
/// Engines run on the inference worker thread, hence `Send`.
pub trait SegmentationModel: Send {
    /// Process a frame and return a mask with the frame's dimensions
    ///
    /// `timestamp_ms` increases strictly between calls of one engine.
    fn segment(&mut self, frame: &RgbImage, timestamp_ms: u64) -> Result<SegmentationMask>;
}

/// Creates segmentation engines for a given delegate
pub trait SegmenterFactory {
    fn create(&self, delegate: Delegate) -> Result<Box<dyn SegmentationModel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_row_major() {
        let mask = SegmentationMask::new(3, 2, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]).unwrap();
        assert_eq!(mask.confidence(0, 1), 0.3);
        assert_eq!(mask.confidence(2, 1), 0.5);
        assert_eq!(mask.confidence(2, 0), 0.2);
    }

    #[test]
    fn wrong_buffer_length_rejected() {
        assert!(SegmentationMask::new(3, 2, vec![0.0; 5]).is_none());
    }
}
