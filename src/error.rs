use crate::config::Delegate;
use thiserror::Error;

/// Errors surfaced by the processing pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("camera stream ended")]
    StreamEnded,

    #[error("inference engine failed to initialize (tried {attempted:?}): {reason}")]
    InferenceInitFailed {
        attempted: Vec<Delegate>,
        reason: String,
    },

    #[error("inference worker is no longer available")]
    InferenceUnavailable,

    #[error("failed to load background asset {url}: {reason}")]
    AssetLoadFailed { url: String, reason: String },

    #[error("processor is already running")]
    AlreadyRunning,

    #[error("processor is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a segmentation request is already in flight")]
    SegmentationBusy,

    #[error("segmentation timestamp {timestamp_ms}ms does not follow {previous_ms}ms")]
    NonMonotonicTimestamp { timestamp_ms: u64, previous_ms: u64 },

    #[error("mask is {mask_width}x{mask_height} but frame is {frame_width}x{frame_height}")]
    MaskSizeMismatch {
        mask_width: u32,
        mask_height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Errors after which the running session cannot continue
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::StreamEnded | Self::InferenceUnavailable)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
