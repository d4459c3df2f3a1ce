//! ONNX Runtime session construction shared by the segmentation and face models.

mod preprocess;

pub use preprocess::Preprocessor;

use crate::config::Delegate;
use anyhow::{Context, Result};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;

/// Build a session pinned to one delegate
///
/// The GPU delegate fails instead of silently running on the CPU, so callers
/// can fall back explicitly.
pub fn build_session(model_path: &Path, delegate: Delegate, intra_threads: usize) -> Result<Session> {
    tracing::info!("Loading {} on {:?}", model_path.display(), delegate);

    let builder = Session::builder()
        .context("Failed to create ORT session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set graph optimization level")?
        .with_intra_threads(intra_threads)
        .context("Failed to set intra-op threads")?;

    let builder = match delegate {
        Delegate::Gpu => builder.with_execution_providers([CUDAExecutionProvider::default()
            .build()
            .error_on_failure()]),
        Delegate::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()]),
    }
    .with_context(|| format!("Failed to register {delegate:?} execution provider"))?;

    let session = builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path.display()))?;

    tracing::info!("Model {} ready", model_path.display());
    Ok(session)
}
