//! Live webcam background replacement with face-centered autocrop.
//!
//! [`VideoProcessor`] owns a session: camera, segmentation worker, optional
//! face locator and the render loop that writes composited frames to an
//! [`output::OutputSink`].

pub mod background;
pub mod capture;
pub mod config;
pub mod crop;
pub mod error;
pub mod face;
pub mod inference;
pub mod output;
pub mod processor;
pub mod render;
pub mod segmentation;

pub use config::{AspectRatio, BackgroundSource, Delegate, ProcessorConfig};
pub use error::{PipelineError, Result};
pub use processor::{Backends, ProcessorState, StopHandle, VideoProcessor};
pub use render::FrameOutcome;
