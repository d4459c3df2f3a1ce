mod adapter;
mod rvm;
pub mod types;

pub use adapter::SegmentationAdapter;
pub use rvm::{RobustVideoMatting, RvmFactory};
pub use types::{SegmentationMask, SegmentationModel, SegmenterFactory};
