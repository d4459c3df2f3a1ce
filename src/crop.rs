use crate::capture::VideoDimensions;
use crate::config::AspectRatio;
use crate::face::{FaceAdapter, FaceBox};
use image::RgbImage;

/// Origin shift below which a new crop is ignored (anti-jitter)
pub const MIN_CROP_SHIFT_PX: f64 = 20.0;

/// Face detection attempts per arming of the planner
pub const MAX_FACE_ATTEMPTS: u32 = 20;

/// Spacing between face detection attempts while no face has been found
pub const FACE_RETRY_INTERVAL_MS: u64 = 100;

/// Crop region within the source frame, in source pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRectangle {
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRectangle {
    /// The largest rectangle of `ratio` centered in the frame
    pub fn centered(video: VideoDimensions, ratio: AspectRatio) -> Self {
        plan_crop(None, video, ratio)
    }

    /// Whole-pixel size of a canvas showing this rectangle 1:1
    pub fn canvas_size(&self) -> (u32, u32) {
        (
            (self.width.round() as u32).max(1),
            (self.height.round() as u32).max(1),
        )
    }

    /// Integer bounds `(x, y, width, height)` clamped to the frame
    pub fn pixel_bounds(&self, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let width = (self.width.round() as u32).clamp(1, frame_width.max(1));
        let height = (self.height.round() as u32).clamp(1, frame_height.max(1));
        let x = (self.origin_x.round().max(0.0) as u32).min(frame_width.saturating_sub(width));
        let y = (self.origin_y.round().max(0.0) as u32).min(frame_height.saturating_sub(height));
        (x, y, width, height)
    }

    fn origin_distance(&self, other: &CropRectangle) -> f64 {
        (self.origin_x - other.origin_x).hypot(self.origin_y - other.origin_y)
    }
}

/// Largest crop of `ratio` centered on the face (or the frame), kept inside the frame
///
/// Width starts at the full frame width; when the derived height does not fit,
/// height becomes the full frame height and width is derived from it.
pub fn plan_crop(face: Option<&FaceBox>, video: VideoDimensions, ratio: AspectRatio) -> CropRectangle {
    let (video_width, video_height) = (video.width as f64, video.height as f64);
    let ratio = ratio.value();

    let mut width = video_width;
    let mut height = width / ratio;
    if height > video_height {
        height = video_height;
        width = height * ratio;
    }

    let (center_x, center_y) = face
        .map(FaceBox::center)
        .unwrap_or((video_width / 2.0, video_height / 2.0));

    let origin_x = (center_x - width / 2.0).clamp(0.0, (video_width - width).max(0.0));
    let origin_y = (center_y - height / 2.0).clamp(0.0, (video_height - height).max(0.0));

    CropRectangle {
        origin_x,
        origin_y,
        width,
        height,
    }
}

/// Result of one autocrop attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutocropOutcome {
    /// A face was found and the crop moved to it
    Moved,
    /// A face was found but within the anti-jitter distance
    Held,
    /// No face; the crop is unchanged
    NoFace,
}

/// Owns the active crop and decides when face detection runs
#[derive(Debug, Clone)]
pub struct AutocropPlanner {
    video: VideoDimensions,
    ratio: AspectRatio,
    active: CropRectangle,
    attempts: u32,
    face_found: bool,
    last_attempt_ms: Option<u64>,
}

impl AutocropPlanner {
    pub fn new(video: VideoDimensions, ratio: AspectRatio) -> Self {
        Self {
            video,
            ratio,
            active: CropRectangle::centered(video, ratio),
            attempts: 0,
            face_found: false,
            last_attempt_ms: None,
        }
    }

    pub fn active(&self) -> CropRectangle {
        self.active
    }

    /// Replace the active crop if its origin moved far enough
    pub fn propose(&mut self, candidate: CropRectangle) -> bool {
        if self.active.origin_distance(&candidate) > MIN_CROP_SHIFT_PX {
            self.active = candidate;
            true
        } else {
            false
        }
    }

    /// Whether a detection attempt is due at `now_ms`
    pub fn wants_attempt(&self, now_ms: u64) -> bool {
        if self.face_found || self.attempts >= MAX_FACE_ATTEMPTS {
            return false;
        }
        self.last_attempt_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= FACE_RETRY_INTERVAL_MS)
    }

    /// Detect the face in `frame` and move the crop toward it
    pub fn attempt(&mut self, faces: &mut FaceAdapter, frame: &RgbImage, now_ms: u64) -> AutocropOutcome {
        self.attempts += 1;
        self.last_attempt_ms = Some(now_ms);

        let detections = faces.detect(frame);
        let Some(face) = detections.first() else {
            if self.attempts >= MAX_FACE_ATTEMPTS {
                tracing::info!("No face after {} attempts, keeping centered crop", self.attempts);
            }
            return AutocropOutcome::NoFace;
        };

        self.face_found = true;
        let candidate = plan_crop(Some(face), self.video, self.ratio);
        if self.propose(candidate) {
            tracing::info!(
                "Autocrop moved to ({:.0}, {:.0}) {:.0}x{:.0}",
                candidate.origin_x,
                candidate.origin_y,
                candidate.width,
                candidate.height
            );
            AutocropOutcome::Moved
        } else {
            tracing::debug!("Autocrop held, face within {MIN_CROP_SHIFT_PX}px of current crop");
            AutocropOutcome::Held
        }
    }

    /// Allow detection to run again (explicit refocus)
    pub fn rearm(&mut self) {
        self.attempts = 0;
        self.face_found = false;
        self.last_attempt_ms = None;
    }
}
