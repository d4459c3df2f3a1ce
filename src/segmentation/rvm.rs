use super::types::{SegmentationMask, SegmentationModel, SegmenterFactory};
use crate::config::Delegate;
use crate::inference::{self, Preprocessor};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::{ArrayD, IxDyn};
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};

const RECURRENT_INPUTS: [&str; 4] = ["r1i", "r2i", "r3i", "r4i"];
const RECURRENT_OUTPUTS: [&str; 4] = ["r1o", "r2o", "r3o", "r4o"];

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,

    // Recurrent hidden states, fed back in the next frame
    state: [ArrayD<f32>; 4],

    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Default Configuration
    /// - Input size: 512x512 (can be adjusted for performance/quality tradeoff)
    /// - Downsample ratio: 0.25 (hidden states are 1/4 of input resolution)
    pub fn new<P: AsRef<Path>>(model_path: P, delegate: Delegate) -> Result<Self> {
        let session = inference::build_session(model_path.as_ref(), delegate, 4)?;

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(512, 512),
            state: Self::initial_state(),
            downsample_ratio: 0.25,
        })
    }

    /// The exported graph accepts 1x1x1x1 zeros as the first-frame state
    fn initial_state() -> [ArrayD<f32>; 4] {
        std::array::from_fn(|_| ArrayD::zeros(IxDyn(&[1, 1, 1, 1])))
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbImage, timestamp_ms: u64) -> Result<SegmentationMask> {
        let _span = tracing::debug_span!("rvm_segment", timestamp_ms).entered();

        let src = Tensor::from_array(self.preprocessor.preprocess(frame))?;
        let [r1, r2, r3, r4] = std::mem::replace(&mut self.state, Self::initial_state());
        let ratio = Tensor::from_array(([1usize], vec![self.downsample_ratio]))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "src" => src,
                RECURRENT_INPUTS[0] => Tensor::from_array(r1)?,
                RECURRENT_INPUTS[1] => Tensor::from_array(r2)?,
                RECURRENT_INPUTS[2] => Tensor::from_array(r3)?,
                RECURRENT_INPUTS[3] => Tensor::from_array(r4)?,
                "downsample_ratio" => ratio
            ])
            .context("Failed to run inference")?;

        // Alpha matte, shape [1, 1, H, W]
        let pha = outputs["pha"]
            .try_extract_array::<f32>()
            .context("Failed to extract alpha matte")?;
        let shape = pha.shape().to_vec();
        if shape.len() != 4 {
            return Err(anyhow!("unexpected matte shape {shape:?}"));
        }
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);
        let matte: Vec<f32> = pha.iter().copied().collect();

        for (slot, name) in self.state.iter_mut().zip(RECURRENT_OUTPUTS) {
            *slot = outputs[name]
                .try_extract_array::<f32>()
                .with_context(|| format!("Failed to extract recurrent state {name}"))?
                .to_owned();
        }

        let (frame_width, frame_height) = frame.dimensions();
        let resized = Preprocessor::resize_matte(
            matte,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        );

        SegmentationMask::new(frame_width, frame_height, resized)
            .ok_or_else(|| anyhow!("resized matte does not cover {frame_width}x{frame_height}"))
    }
}

/// Loads RVM sessions from one model file
#[derive(Debug, Clone)]
pub struct RvmFactory {
    model_path: PathBuf,
}

impl RvmFactory {
    pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }
}

impl SegmenterFactory for RvmFactory {
    fn create(&self, delegate: Delegate) -> Result<Box<dyn SegmentationModel>> {
        let model = RobustVideoMatting::new(&self.model_path, delegate)?;
        Ok(Box::new(model))
    }
}
