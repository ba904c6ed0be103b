//! Asynchronous hand-off to the mask engine.
//!
//! Requests go out over a channel and results come back on the completion
//! channel supplied with each request, on whatever thread the engine uses.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use image::RgbImage;

use super::types::{ConfidenceMask, SegmentationModel};
use crate::error::EngineError;

/// An upright, decoded frame waiting for its mask.
#[derive(Debug, Clone)]
pub struct MaskRequest {
    pub sequence: u64,
    pub image: Arc<RgbImage>,
}

/// The engine's answer for one request.
#[derive(Debug, Clone)]
pub struct MaskResponse {
    pub sequence: u64,
    pub result: Result<ConfidenceMask, EngineError>,
}

/// Anything that can turn an upright frame into a confidence mask, eventually.
///
/// Implementations must answer every accepted request exactly once on
/// `completion`, success or failure.
pub trait MaskEngine: Send + Sync {
    fn submit(
        &self,
        request: MaskRequest,
        completion: Sender<MaskResponse>,
    ) -> Result<(), EngineError>;
}

struct Job {
    request: MaskRequest,
    completion: Sender<MaskResponse>,
}

/// Runs a [`SegmentationModel`] on a dedicated worker thread.
pub struct ThreadedMaskEngine {
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedMaskEngine {
    pub fn spawn(model: Box<dyn SegmentationModel>) -> Result<Self> {
        // One queued job at most; the pipeline never has more than one in flight.
        let (jobs, rx) = channel::bounded::<Job>(1);

        let worker = thread::Builder::new()
            .name("mask-engine".to_string())
            .spawn(move || worker_main(model, rx))
            .context("Failed to spawn mask engine thread")?;

        Ok(Self {
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }
}

impl MaskEngine for ThreadedMaskEngine {
    fn submit(
        &self,
        request: MaskRequest,
        completion: Sender<MaskResponse>,
    ) -> Result<(), EngineError> {
        let jobs = self.jobs.as_ref().ok_or(EngineError::Disconnected)?;
        jobs.try_send(Job {
            request,
            completion,
        })
        .map_err(|e| match e {
            TrySendError::Full(_) => EngineError::Busy,
            TrySendError::Disconnected(_) => EngineError::Disconnected,
        })
    }
}

impl Drop for ThreadedMaskEngine {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Mask engine thread panicked");
            }
        }
    }
}

fn worker_main(mut model: Box<dyn SegmentationModel>, jobs: Receiver<Job>) {
    tracing::debug!("Mask engine worker started, model input {:?}", model.input_size());

    for Job {
        request,
        completion,
    } in jobs.iter()
    {
        let _span = tracing::debug_span!("segment", sequence = request.sequence).entered();

        let result = model
            .segment(&request.image)
            .map_err(|e| EngineError::Inference(format!("{e:#}")));

        if let Err(e) = &result {
            tracing::debug!("Segmentation of frame {} failed: {}", request.sequence, e);
        }

        let response = MaskResponse {
            sequence: request.sequence,
            result,
        };
        if completion.send(response).is_err() {
            tracing::debug!("Completion channel closed, discarding mask");
        }
    }

    tracing::debug!("Mask engine worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::time::Duration;

    struct HalfMask;

    impl SegmentationModel for HalfMask {
        fn segment(&mut self, frame: &RgbImage) -> Result<ConfidenceMask> {
            if frame.width() == 0 {
                bail!("empty frame");
            }
            Ok(ConfidenceMask::from_fn(4, 2, |x, _| if x < 2 { 1.0 } else { 0.0 }))
        }

        fn input_size(&self) -> (u32, u32) {
            (4, 2)
        }
    }

    #[test]
    fn answers_on_completion_channel() {
        let engine = ThreadedMaskEngine::spawn(Box::new(HalfMask)).unwrap();
        let (tx, rx) = channel::unbounded();

        engine
            .submit(
                MaskRequest {
                    sequence: 7,
                    image: Arc::new(RgbImage::new(8, 8)),
                },
                tx,
            )
            .unwrap();

        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.sequence, 7);
        let mask = response.result.unwrap();
        assert_eq!(mask.dimensions(), (4, 2));
        assert_eq!(mask.get(0, 0), Some(1.0));
    }

    #[test]
    fn model_failure_becomes_engine_error() {
        let engine = ThreadedMaskEngine::spawn(Box::new(HalfMask)).unwrap();
        let (tx, rx) = channel::unbounded();

        engine
            .submit(
                MaskRequest {
                    sequence: 1,
                    image: Arc::new(RgbImage::new(0, 0)),
                },
                tx,
            )
            .unwrap();

        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(response.result, Err(EngineError::Inference(ref msg)) if msg.contains("empty frame")));
    }
}
