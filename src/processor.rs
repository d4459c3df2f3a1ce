//! Session lifecycle: acquire everything on `start`, release everything on `stop`.

use crate::background::{AssetLoader, BackgroundCompositor};
use crate::capture::{CameraAcquirer, CaptureSource, MediaConstraints};
use crate::config::ProcessorConfig;
use crate::crop::{AutocropOutcome, AutocropPlanner, CropRectangle};
use crate::error::{PipelineError, Result};
use crate::face::{FaceAdapter, FaceLocatorFactory};
use crate::output::OutputSink;
use crate::render::{FrameClock, FrameContext, FrameOutcome, RenderLoop};
use crate::segmentation::{SegmentationAdapter, SegmenterFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle state of a [`VideoProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Initializing,
    Running,
    Stopping,
}

/// Collaborators the processor drives; supplied once at construction
pub struct Backends {
    pub camera: Box<dyn CameraAcquirer>,
    pub segmenter: Box<dyn SegmenterFactory>,
    /// `None` runs without autocrop
    pub faces: Option<Box<dyn FaceLocatorFactory>>,
    pub assets: Box<dyn AssetLoader>,
    pub output: Box<dyn OutputSink>,
    pub constraints: MediaConstraints,
}

/// Resources held while running
///
/// Fields drop in declaration order: camera, then segmentation, then faces.
struct Session {
    capture: Box<dyn CaptureSource>,
    segmenter: SegmentationAdapter,
    faces: Option<FaceAdapter>,
    planner: AutocropPlanner,
    background: BackgroundCompositor,
    renderer: RenderLoop,
}

/// Clears the liveness flag from any thread
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns the camera, inference engines and render loop for one output surface
pub struct VideoProcessor {
    config: ProcessorConfig,
    backends: Backends,
    state: ProcessorState,
    session: Option<Session>,
    live: Arc<AtomicBool>,
}

impl VideoProcessor {
    pub fn new(config: ProcessorConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backends,
            state: ProcessorState::Idle,
            session: None,
            live: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Active crop, while running
    pub fn crop(&self) -> Option<CropRectangle> {
        self.session.as_ref().map(|session| session.planner.active())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.live))
    }

    /// Acquire the camera and engines and begin accepting ticks
    ///
    /// On failure everything acquired so far is released and the processor is Idle again.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ProcessorState::Idle {
            return Err(PipelineError::AlreadyRunning);
        }

        self.state = ProcessorState::Initializing;
        // Armed before initialization so a stop requested meanwhile survives
        self.live.store(true, Ordering::SeqCst);
        tracing::info!("Starting video processor");

        match self.open_session() {
            Ok(session) => {
                self.session = Some(session);
                self.state = ProcessorState::Running;
                if self.live.load(Ordering::SeqCst) {
                    tracing::info!("Video processor running");
                } else {
                    tracing::info!("Stop requested during start, halting on next tick");
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start video processor: {}", e);
                self.live.store(false, Ordering::SeqCst);
                self.state = ProcessorState::Idle;
                Err(e)
            }
        }
    }

    fn open_session(&mut self) -> Result<Session> {
        let _span = tracing::info_span!("start").entered();

        let segmenter = SegmentationAdapter::init(self.backends.segmenter.as_ref(), self.config.delegate)?;
        tracing::info!("Segmentation engine ready on {:?}", segmenter.delegate());

        let mut capture = self.backends.camera.acquire(&self.backends.constraints)?;
        let video = capture.resolution();
        if video.width == 0 || video.height == 0 {
            return Err(PipelineError::DeviceUnavailable(format!(
                "camera reported a {}x{} frame",
                video.width, video.height
            )));
        }

        let mut planner = AutocropPlanner::new(video, self.config.aspect_ratio);
        let canvas_size = planner.active().canvas_size();
        tracing::info!(
            "Capture {}x{}, canvas {}x{} (aspect {})",
            video.width,
            video.height,
            canvas_size.0,
            canvas_size.1,
            self.config.aspect_ratio
        );

        let mut background = BackgroundCompositor::new(canvas_size, self.config.fill_color);
        if let Err(e) = background.prepare(&self.config.background, self.backends.assets.as_ref()) {
            tracing::warn!("{}, using solid fill", e);
        }

        let mut faces = self
            .backends
            .faces
            .as_deref()
            .and_then(|factory| FaceAdapter::init(factory, self.config.delegate));

        if let Some(faces) = faces.as_mut() {
            match capture.capture_frame() {
                Ok(frame) => {
                    if planner.attempt(faces, &frame, 0) == AutocropOutcome::NoFace {
                        tracing::info!("No face in first frame, will retry");
                    }
                }
                Err(e) => tracing::warn!("Skipping initial autocrop: {}", e),
            }
        }

        Ok(Session {
            capture,
            segmenter,
            faces,
            planner,
            background,
            renderer: RenderLoop::new(canvas_size),
        })
    }

    /// Release every session resource; a no-op when already Idle
    pub fn stop(&mut self) {
        if self.state == ProcessorState::Idle {
            return;
        }

        self.state = ProcessorState::Stopping;
        self.live.store(false, Ordering::SeqCst);

        if let Some(session) = self.session.take() {
            tracing::info!("Stopping after {} frames", session.renderer.frames_rendered());
            drop(session);
        }

        self.state = ProcessorState::Idle;
        tracing::info!("Video processor stopped");
    }

    /// Apply a new configuration to the running session
    ///
    /// A changed aspect ratio restarts the session, unless a stop is pending; a
    /// changed delegate applies on the next start.
    pub fn update_options(&mut self, config: ProcessorConfig) -> Result<()> {
        if self.state != ProcessorState::Running {
            return Err(PipelineError::NotRunning);
        }
        config.validate()?;

        let previous = std::mem::replace(&mut self.config, config);

        if previous.aspect_ratio != self.config.aspect_ratio {
            if !self.live.load(Ordering::SeqCst) {
                tracing::info!("Stop pending, not restarting for new aspect ratio");
                self.stop();
                return Ok(());
            }
            tracing::info!(
                "Aspect ratio changed from {} to {}, restarting",
                previous.aspect_ratio,
                self.config.aspect_ratio
            );
            self.stop();
            return self.start();
        }

        if previous.delegate != self.config.delegate {
            tracing::info!("Delegate {:?} takes effect on next start", self.config.delegate);
        }

        let Some(session) = self.session.as_mut() else {
            return Err(PipelineError::NotRunning);
        };

        if previous.fill_color != self.config.fill_color {
            session.background.set_fill(self.config.fill_color);
        }

        if previous.background != self.config.background {
            if let Err(e) = session
                .background
                .prepare(&self.config.background, self.backends.assets.as_ref())
            {
                tracing::warn!("{}, using solid fill", e);
            }
        }

        Ok(())
    }

    /// Run face detection again on the next ticks
    pub fn refocus(&mut self) -> Result<()> {
        let session = match (self.state, self.session.as_mut()) {
            (ProcessorState::Running, Some(session)) => session,
            _ => return Err(PipelineError::NotRunning),
        };
        if session.faces.is_none() {
            tracing::warn!("Refocus requested but face locator is unavailable");
        }
        session.planner.rearm();
        Ok(())
    }

    /// One render-loop iteration at `timestamp_ms`
    ///
    /// Session-fatal errors stop the processor before being returned.
    pub fn tick(&mut self, timestamp_ms: u64) -> Result<FrameOutcome> {
        if self.state != ProcessorState::Running {
            return Ok(FrameOutcome::Halted);
        }
        if !self.live.load(Ordering::SeqCst) {
            tracing::info!("Stop requested");
            self.stop();
            return Ok(FrameOutcome::Halted);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(FrameOutcome::Halted);
        };

        let ctx = FrameContext {
            capture: session.capture.as_mut(),
            segmenter: &mut session.segmenter,
            faces: session.faces.as_mut(),
            planner: &mut session.planner,
            background: &mut session.background,
            output: self.backends.output.as_mut(),
            config: &self.config,
        };

        match session.renderer.render(ctx, timestamp_ms) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!("Session ended: {}", e);
                self.stop();
                Err(e)
            }
        }
    }

    /// Tick on every clock refresh until stopped
    pub fn run(&mut self, clock: &mut dyn FrameClock) -> Result<()> {
        if self.state != ProcessorState::Running {
            return Err(PipelineError::NotRunning);
        }

        tracing::info!("Entering render loop");
        while self.state == ProcessorState::Running && self.live.load(Ordering::SeqCst) {
            let timestamp_ms = clock.next_tick();
            self.tick(timestamp_ms)?;
        }

        self.stop();
        Ok(())
    }
}

impl Drop for VideoProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
