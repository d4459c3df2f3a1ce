use super::{FaceBox, FaceLocator, FaceLocatorFactory};
use crate::config::Delegate;
use crate::inference::{self, Preprocessor};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::Ix3;
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};

/// RFB-320 input size
const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
/// Minimum face-class probability for a candidate
const SCORE_THRESHOLD: f32 = 0.7;
/// IoU above which the weaker of two boxes is suppressed
const IOU_THRESHOLD: f64 = 0.3;

/// Ultra-Light-Fast-Generic-Face-Detector (RFB-320) ONNX model
pub struct UltraFace {
    session: Session,
    preprocessor: Preprocessor,
}

impl UltraFace {
    pub fn new<P: AsRef<Path>>(model_path: P, delegate: Delegate) -> Result<Self> {
        let session = inference::build_session(model_path.as_ref(), delegate, 2)?;
        Ok(Self {
            session,
            preprocessor: Preprocessor::new(INPUT_WIDTH, INPUT_HEIGHT).with_normalization(127.0, 128.0),
        })
    }
}

impl FaceLocator for UltraFace {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>> {
        let input = Tensor::from_array(self.preprocessor.preprocess(frame))?;
        let outputs = self
            .session
            .run(ort::inputs!["input" => input])
            .context("Face detection inference failed")?;

        // scores: [1, N, 2] (background, face); boxes: [1, N, 4] normalized corners
        let scores = outputs["scores"]
            .try_extract_array::<f32>()
            .context("Failed to extract face scores")?
            .into_dimensionality::<Ix3>()
            .context("Face scores are not [1, N, 2]")?;
        let boxes = outputs["boxes"]
            .try_extract_array::<f32>()
            .context("Failed to extract face boxes")?
            .into_dimensionality::<Ix3>()
            .context("Face boxes are not [1, N, 4]")?;
        if scores.shape()[1] != boxes.shape()[1] || scores.shape()[2] < 2 || boxes.shape()[2] < 4 {
            return Err(anyhow!(
                "unexpected detector output shapes {:?} / {:?}",
                scores.shape(),
                boxes.shape()
            ));
        }

        let (frame_width, frame_height) = (frame.width() as f64, frame.height() as f64);
        let mut candidates: Vec<FaceBox> = (0..scores.shape()[1])
            .filter(|&i| scores[[0, i, 1]] > SCORE_THRESHOLD)
            .map(|i| {
                let x1 = (boxes[[0, i, 0]] as f64).clamp(0.0, 1.0) * frame_width;
                let y1 = (boxes[[0, i, 1]] as f64).clamp(0.0, 1.0) * frame_height;
                let x2 = (boxes[[0, i, 2]] as f64).clamp(0.0, 1.0) * frame_width;
                let y2 = (boxes[[0, i, 3]] as f64).clamp(0.0, 1.0) * frame_height;
                FaceBox {
                    origin_x: x1,
                    origin_y: y1,
                    width: (x2 - x1).max(0.0),
                    height: (y2 - y1).max(0.0),
                    confidence: scores[[0, i, 1]],
                }
            })
            .collect();

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let faces = suppress_overlaps(candidates);
        tracing::debug!("Detected {} face(s)", faces.len());
        Ok(faces)
    }
}

/// Greedy non-maximum suppression over boxes sorted by confidence
fn suppress_overlaps(sorted: Vec<FaceBox>) -> Vec<FaceBox> {
    let mut kept: Vec<FaceBox> = Vec::new();
    for candidate in sorted {
        if kept.iter().all(|k| k.iou(&candidate) <= IOU_THRESHOLD) {
            kept.push(candidate);
        }
    }
    kept
}

#[derive(Debug, Clone)]
pub struct UltraFaceFactory {
    model_path: PathBuf,
}

impl UltraFaceFactory {
    pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }
}

impl FaceLocatorFactory for UltraFaceFactory {
    fn create(&self, delegate: Delegate) -> Result<Box<dyn FaceLocator>> {
        Ok(Box::new(UltraFace::new(&self.model_path, delegate)?))
    }
}
