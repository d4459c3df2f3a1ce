mod ultraface;

pub use ultraface::{UltraFace, UltraFaceFactory};

use crate::config::Delegate;
use anyhow::Result;
use image::RgbImage;

/// Bounding box of a detected face, in source-frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f32,
}

impl FaceBox {
    pub fn center(&self) -> (f64, f64) {
        (self.origin_x + self.width / 2.0, self.origin_y + self.height / 2.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &FaceBox) -> f64 {
        let ix1 = self.origin_x.max(other.origin_x);
        let iy1 = self.origin_y.max(other.origin_y);
        let ix2 = (self.origin_x + self.width).min(other.origin_x + other.width);
        let iy2 = (self.origin_y + self.height).min(other.origin_y + other.height);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.width * self.height + other.width * other.height - inter)
    }
}

/// Pluggable face detection backend
pub trait FaceLocator {
    /// Detect faces in a still frame; order is not significant
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>>;
}

/// Creates face locators for a given delegate
pub trait FaceLocatorFactory {
    fn create(&self, delegate: Delegate) -> Result<Box<dyn FaceLocator>>;
}

/// Face detection that never aborts the pipeline
pub struct FaceAdapter {
    locator: Box<dyn FaceLocator>,
}

impl FaceAdapter {
    /// Returns `None` (autocrop disabled) when no delegate can host the detector
    pub fn init(factory: &dyn FaceLocatorFactory, preferred: Delegate) -> Option<Self> {
        for delegate in [preferred, preferred.fallback()] {
            match factory.create(delegate) {
                Ok(locator) => {
                    tracing::info!("Face locator ready on {:?}", delegate);
                    return Some(Self { locator });
                }
                Err(e) => tracing::warn!("Face locator failed on {:?}: {:#}", delegate, e),
            }
        }
        tracing::warn!("Face locator unavailable, autocrop disabled for this session");
        None
    }

    /// Faces ordered by descending confidence; empty on detector errors
    pub fn detect(&mut self, frame: &RgbImage) -> Vec<FaceBox> {
        let _span = tracing::debug_span!("face_detect").entered();
        match self.locator.detect(frame) {
            Ok(mut faces) => {
                faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                faces
            }
            Err(e) => {
                tracing::warn!("Face detection failed: {:#}", e);
                Vec::new()
            }
        }
    }
}

impl Drop for FaceAdapter {
    fn drop(&mut self) {
        tracing::info!("Face locator released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn face(x: f64, confidence: f32) -> FaceBox {
        FaceBox {
            origin_x: x,
            origin_y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence,
        }
    }

    struct Listed(Vec<FaceBox>);

    impl FaceLocator for Listed {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceBox>> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl FaceLocator for Broken {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<FaceBox>> {
            Err(anyhow!("model crashed"))
        }
    }

    struct Factory(Option<Delegate>);

    impl FaceLocatorFactory for Factory {
        fn create(&self, delegate: Delegate) -> Result<Box<dyn FaceLocator>> {
            match self.0 {
                Some(working) if working == delegate => Ok(Box::new(Listed(vec![]))),
                _ => Err(anyhow!("no {delegate:?}")),
            }
        }
    }

    #[test]
    fn sorted_by_confidence() {
        let mut adapter = FaceAdapter {
            locator: Box::new(Listed(vec![face(0.0, 0.2), face(50.0, 0.9), face(20.0, 0.5)])),
        };
        let faces = adapter.detect(&RgbImage::new(4, 4));
        let confidences: Vec<f32> = faces.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.5, 0.2]);
    }

    #[test]
    fn detector_error_yields_no_faces() {
        let mut adapter = FaceAdapter {
            locator: Box::new(Broken),
        };
        assert!(adapter.detect(&RgbImage::new(4, 4)).is_empty());
    }

    #[test]
    fn init_falls_back_then_disables() {
        assert!(FaceAdapter::init(&Factory(Some(Delegate::Cpu)), Delegate::Gpu).is_some());
        assert!(FaceAdapter::init(&Factory(None), Delegate::Gpu).is_none());
    }

    #[test]
    fn iou_of_overlapping_boxes() {
        let a = face(0.0, 1.0);
        let b = face(5.0, 1.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(a.iou(&face(100.0, 1.0)), 0.0);
    }
}
