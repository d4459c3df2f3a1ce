use super::types::{SegmentationMask, SegmentationModel, SegmenterFactory};
use crate::config::Delegate;
use crate::error::{PipelineError, Result};
use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbImage;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Request {
    frame: Arc<RgbImage>,
    timestamp_ms: u64,
}

struct Completion {
    timestamp_ms: u64,
    result: anyhow::Result<SegmentationMask>,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    timestamp_ms: u64,
    width: u32,
    height: u32,
}

/// Runs a segmentation engine on its own worker with a single in-flight slot
///
/// A request must be completed with [`wait`](Self::wait) before the next one
/// can be issued, so masks come back in request order.
pub struct SegmentationAdapter {
    delegate: Delegate,
    requests: Option<Sender<Request>>,
    completions: Receiver<Completion>,
    in_flight: Option<InFlight>,
    last_timestamp_ms: Option<u64>,
    worker: Option<JoinHandle<()>>,
}

impl SegmentationAdapter {
    /// Create the engine on `preferred`, falling back once to the other delegate
    pub fn init(factory: &dyn SegmenterFactory, preferred: Delegate) -> Result<Self> {
        let mut attempted = Vec::with_capacity(2);
        let mut reasons = Vec::with_capacity(2);

        for delegate in [preferred, preferred.fallback()] {
            attempted.push(delegate);
            match factory.create(delegate) {
                Ok(engine) => {
                    if delegate != preferred {
                        tracing::warn!("Segmentation running on fallback delegate {:?}", delegate);
                    }
                    return Self::spawn(engine, delegate);
                }
                Err(e) => {
                    tracing::warn!("Segmentation engine failed on {:?}: {:#}", delegate, e);
                    reasons.push(format!("{delegate:?}: {e:#}"));
                }
            }
        }

        Err(PipelineError::InferenceInitFailed {
            attempted,
            reason: reasons.join("; "),
        })
    }

    fn spawn(mut engine: Box<dyn SegmentationModel>, delegate: Delegate) -> Result<Self> {
        let (request_tx, request_rx) = bounded::<Request>(1);
        let (completion_tx, completion_rx) = bounded::<Completion>(1);

        let worker = thread::Builder::new()
            .name("segmentation".into())
            .spawn(move || {
                for request in request_rx {
                    let result = engine.segment(&request.frame, request.timestamp_ms);
                    let completion = Completion {
                        timestamp_ms: request.timestamp_ms,
                        result,
                    };
                    if completion_tx.send(completion).is_err() {
                        break;
                    }
                }
                drop(engine);
                tracing::debug!("Segmentation worker exited");
            })
            .context("Failed to spawn segmentation worker")?;

        Ok(Self {
            delegate,
            requests: Some(request_tx),
            completions: completion_rx,
            in_flight: None,
            last_timestamp_ms: None,
            worker: Some(worker),
        })
    }

    pub fn delegate(&self) -> Delegate {
        self.delegate
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Hand a frame to the engine
    pub fn request(&mut self, frame: Arc<RgbImage>, timestamp_ms: u64) -> Result<()> {
        if self.in_flight.is_some() {
            return Err(PipelineError::SegmentationBusy);
        }
        if let Some(previous_ms) = self.last_timestamp_ms {
            if timestamp_ms <= previous_ms {
                return Err(PipelineError::NonMonotonicTimestamp {
                    timestamp_ms,
                    previous_ms,
                });
            }
        }

        let sender = self.requests.as_ref().ok_or(PipelineError::InferenceUnavailable)?;
        let (width, height) = frame.dimensions();
        sender
            .send(Request { frame, timestamp_ms })
            .map_err(|_| PipelineError::InferenceUnavailable)?;

        self.in_flight = Some(InFlight {
            timestamp_ms,
            width,
            height,
        });
        self.last_timestamp_ms = Some(timestamp_ms);
        Ok(())
    }

    /// Block until the in-flight request completes
    pub fn wait(&mut self) -> Result<SegmentationMask> {
        let pending = self
            .in_flight
            .take()
            .ok_or_else(|| anyhow!("no segmentation request in flight"))?;

        let completion = self
            .completions
            .recv()
            .map_err(|_| PipelineError::InferenceUnavailable)?;
        debug_assert_eq!(completion.timestamp_ms, pending.timestamp_ms);

        let mask = completion.result?;
        let (mask_width, mask_height) = mask.dimensions();
        if (mask_width, mask_height) != (pending.width, pending.height) {
            return Err(PipelineError::MaskSizeMismatch {
                mask_width,
                mask_height,
                frame_width: pending.width,
                frame_height: pending.height,
            });
        }
        Ok(mask)
    }

    pub fn segment(&mut self, frame: Arc<RgbImage>, timestamp_ms: u64) -> Result<SegmentationMask> {
        self.request(frame, timestamp_ms)?;
        self.wait()
    }
}

impl Drop for SegmentationAdapter {
    fn drop(&mut self) {
        // Closing the channel ends the worker once any in-flight frame is done
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Segmentation worker panicked");
            }
        }
        tracing::info!("Segmentation engine released");
    }
}
