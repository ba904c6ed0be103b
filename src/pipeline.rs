//! Per-frame orchestration across the asynchronous mask boundary.
//!
//! ```text
//! capture ──► on_frame ──► decode ──► orient ──► slot (cap 1) ──► engine
//!                                                  │                 │
//!   renderer ◄── transformer ◄── composite ◄── on_mask ◄── completion channel
//! ```
//!
//! The slot holds the one frame that is waiting for its mask. Claiming it
//! and clearing it each happen under the slot's lock: a frame only enters an
//! empty slot, and a completion only takes the frame whose sequence it
//! carries. A frame that finds the slot occupied is dropped on the spot,
//! which returns its buffer to the capture source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use parking_lot::Mutex;

use crate::capture::PlanarFrame;
use crate::composite::MaskCompositor;
use crate::decode::PlanarImageDecoder;
use crate::display::DisplayTransformer;
use crate::error::PipelineError;
use crate::segmentation::{MaskEngine, MaskRequest, MaskResponse};

/// Where a frame is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Captured,
    Decoded,
    AwaitingMask,
    Composited,
    Published,
    Dropped,
}

/// Result of handing the controller a frame or a mask.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The slot was occupied; the frame was released without being decoded.
    Skipped { sequence: u64 },
    /// Processing failed; the frame was released.
    ///
    /// With [`PipelineError::NotReady`] the cutout itself was kept by the
    /// transformer and is published under this sequence on the next resize.
    Dropped {
        sequence: u64,
        error: PipelineError,
    },
    /// The frame is in the slot and its mask has been requested.
    AwaitingMask { sequence: u64 },
    /// The frame's cutout reached the renderer.
    Published { sequence: u64 },
    /// A completion arrived for a frame that is not the one in the slot.
    Stale { sequence: u64 },
}

impl FrameOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Skipped { sequence }
            | Self::Dropped { sequence, .. }
            | Self::AwaitingMask { sequence }
            | Self::Published { sequence }
            | Self::Stale { sequence } => *sequence,
        }
    }

    /// State the frame is left in. Stale completions leave nothing changed.
    pub fn state(&self) -> Option<FrameState> {
        match self {
            Self::Skipped { .. } | Self::Dropped { .. } => Some(FrameState::Dropped),
            Self::AwaitingMask { .. } => Some(FrameState::AwaitingMask),
            Self::Published { .. } => Some(FrameState::Published),
            Self::Stale { .. } => None,
        }
    }
}

/// Counters exposed for observability and test assertions.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub frames_captured: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub masks_requested: AtomicU64,
    pub frames_published: AtomicU64,
}

/// The frame occupying the slot, plus its upright raster.
struct InFlight {
    frame: PlanarFrame,
    upright: Arc<RgbImage>,
}

pub struct FramePipelineController<E> {
    decoder: PlanarImageDecoder,
    compositor: MaskCompositor,
    transformer: Arc<DisplayTransformer>,
    engine: E,
    slot: Mutex<Option<InFlight>>,
    completion_tx: Sender<MaskResponse>,
    completion_rx: Receiver<MaskResponse>,
    metrics: PipelineMetrics,
}

impl<E: MaskEngine> FramePipelineController<E> {
    pub fn new(
        decoder: PlanarImageDecoder,
        compositor: MaskCompositor,
        transformer: Arc<DisplayTransformer>,
        engine: E,
    ) -> Self {
        let (completion_tx, completion_rx) = channel::unbounded();
        Self {
            decoder,
            compositor,
            transformer,
            engine,
            slot: Mutex::new(None),
            completion_tx,
            completion_rx,
            metrics: PipelineMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn transformer(&self) -> &Arc<DisplayTransformer> {
        &self.transformer
    }

    /// Where the engine's answers arrive; for callers that `select!` on it.
    pub fn completions(&self) -> &Receiver<MaskResponse> {
        &self.completion_rx
    }

    /// True while a frame is waiting for its mask.
    pub fn is_busy(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Feed one captured frame. Never blocks on the engine.
    pub fn on_frame(&self, frame: PlanarFrame) -> FrameOutcome {
        let sequence = frame.sequence();
        self.metrics.frames_captured.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(sequence, state = ?FrameState::Captured, "frame");

        // Cheap early out; the slot is claimed under its lock below.
        if self.is_busy() {
            return self.skip(sequence);
        }

        let raster = match self.decoder.decode(&frame) {
            Ok(raster) => raster,
            Err(e) => return self.drop_frame(sequence, e.into()),
        };
        tracing::trace!(sequence, state = ?FrameState::Decoded, "frame");

        let upright = Arc::new(self.compositor.orient(raster, frame.rotation()));
        let request = MaskRequest {
            sequence,
            image: upright.clone(),
        };

        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                drop(slot);
                drop(frame);
                return self.skip(sequence);
            }
            *slot = Some(InFlight { frame, upright });
        }

        if let Err(e) = self.engine.submit(request, self.completion_tx.clone()) {
            // Never reached the engine: clear the slot, releasing the frame.
            drop(self.take_in_flight(sequence));
            return self.drop_frame(sequence, e.into());
        }

        self.metrics.masks_requested.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(sequence, state = ?FrameState::AwaitingMask, "frame");
        FrameOutcome::AwaitingMask { sequence }
    }

    /// Finish the in-flight frame with the engine's answer.
    pub fn on_mask(&self, response: MaskResponse) -> FrameOutcome {
        let sequence = response.sequence;

        let Some(in_flight) = self.take_in_flight(sequence) else {
            tracing::warn!("Mask for frame {} matches no frame in flight, ignoring", sequence);
            return FrameOutcome::Stale { sequence };
        };

        let mask = match response.result {
            Ok(mask) => mask,
            Err(e) => return self.drop_frame(sequence, e.into()),
        };

        let InFlight { frame, upright } = in_flight;
        let cutout = match self.compositor.composite(&upright, &mask) {
            Ok(cutout) => cutout,
            Err(e) => return self.drop_frame(sequence, e.into()),
        };
        drop(upright);
        drop(frame);
        tracing::trace!(sequence, state = ?FrameState::Composited, "frame");

        match self.transformer.present(cutout, sequence) {
            Ok(_) => {
                self.metrics.frames_published.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(sequence, state = ?FrameState::Published, "frame");
                FrameOutcome::Published { sequence }
            }
            Err(e) => self.drop_frame(sequence, e),
        }
    }

    /// Wait up to `timeout` for one completion and apply it.
    pub fn pump(&self, timeout: Duration) -> Option<FrameOutcome> {
        match self.completion_rx.recv_timeout(timeout) {
            Ok(response) => Some(self.on_mask(response)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Apply every completion that has already arrived.
    pub fn drain(&self) -> Vec<FrameOutcome> {
        self.completion_rx
            .try_iter()
            .map(|response| self.on_mask(response))
            .collect()
    }

    /// Clear the slot only if it holds frame `sequence`.
    fn take_in_flight(&self, sequence: u64) -> Option<InFlight> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(in_flight) if in_flight.frame.sequence() == sequence => slot.take(),
            _ => None,
        }
    }

    fn skip(&self, sequence: u64) -> FrameOutcome {
        self.metrics.frames_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Frame {} skipped, segmentation still in flight", sequence);
        FrameOutcome::Skipped { sequence }
    }

    fn drop_frame(&self, sequence: u64, error: PipelineError) -> FrameOutcome {
        self.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Frame {} dropped: {}", sequence, error);
        FrameOutcome::Dropped { sequence, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SurfaceGeometry;
    use crate::error::EngineError;
    use crate::segmentation::ConfidenceMask;

    /// Records requests; the test answers them by hand.
    #[derive(Default)]
    struct ManualEngine {
        pending: Mutex<Vec<(MaskRequest, Sender<MaskResponse>)>>,
        refuse: bool,
    }

    impl MaskEngine for ManualEngine {
        fn submit(
            &self,
            request: MaskRequest,
            completion: Sender<MaskResponse>,
        ) -> Result<(), EngineError> {
            if self.refuse {
                return Err(EngineError::Disconnected);
            }
            self.pending.lock().push((request, completion));
            Ok(())
        }
    }

    fn controller(engine: ManualEngine) -> FramePipelineController<ManualEngine> {
        FramePipelineController::new(
            PlanarImageDecoder::default(),
            MaskCompositor::default(),
            Arc::new(DisplayTransformer::new(SurfaceGeometry::new(8, 8, 0.0))),
            engine,
        )
    }

    fn grey_frame(sequence: u64) -> PlanarFrame {
        PlanarFrame::i420(4, 4, vec![128; 24]).with_sequence(sequence)
    }

    fn answer_all(controller: &FramePipelineController<ManualEngine>, confidence: f32) {
        for (request, completion) in controller.engine.pending.lock().drain(..) {
            let mask = ConfidenceMask::from_fn(2, 2, |_, _| confidence);
            completion
                .send(MaskResponse {
                    sequence: request.sequence,
                    result: Ok(mask),
                })
                .unwrap();
        }
    }

    #[test]
    fn second_frame_is_skipped_while_first_awaits_mask() {
        let controller = controller(ManualEngine::default());

        assert_eq!(
            controller.on_frame(grey_frame(0)),
            FrameOutcome::AwaitingMask { sequence: 0 }
        );
        assert!(controller.is_busy());
        assert_eq!(
            controller.on_frame(grey_frame(1)),
            FrameOutcome::Skipped { sequence: 1 }
        );
        assert_eq!(controller.engine.pending.lock().len(), 1);

        answer_all(&controller, 1.0);
        assert_eq!(controller.drain(), vec![FrameOutcome::Published { sequence: 0 }]);
        assert!(!controller.is_busy());

        assert_eq!(
            controller.on_frame(grey_frame(2)),
            FrameOutcome::AwaitingMask { sequence: 2 }
        );
    }

    #[test]
    fn published_cutout_reaches_transformer() {
        let controller = controller(ManualEngine::default());
        controller.on_frame(grey_frame(5));
        answer_all(&controller, 0.9);
        controller.drain();

        let latest = controller.transformer().latest().unwrap();
        assert_eq!(latest.sequence, 5);
        assert_eq!(latest.raster.dimensions(), (8, 8));
        assert_eq!(latest.raster.get_pixel(4, 4).0, [128, 128, 128, 255]);
        assert_eq!(controller.metrics().frames_published.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn engine_failure_drops_and_frees_slot() {
        let controller = controller(ManualEngine::default());
        controller.on_frame(grey_frame(0));

        for (request, completion) in controller.engine.pending.lock().drain(..) {
            completion
                .send(MaskResponse {
                    sequence: request.sequence,
                    result: Err(EngineError::Inference("no subject".into())),
                })
                .unwrap();
        }

        let outcome = controller.pump(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome.state(), Some(FrameState::Dropped));
        assert!(!controller.is_busy());
        assert!(controller.transformer().latest().is_none());
    }

    #[test]
    fn refused_submission_clears_slot() {
        let controller = controller(ManualEngine {
            refuse: true,
            ..Default::default()
        });
        let outcome = controller.on_frame(grey_frame(0));
        assert_eq!(
            outcome,
            FrameOutcome::Dropped {
                sequence: 0,
                error: PipelineError::Engine(EngineError::Disconnected)
            }
        );
        assert!(!controller.is_busy());
    }

    #[test]
    fn decode_failure_never_reaches_engine() {
        let controller = controller(ManualEngine::default());
        let broken = PlanarFrame::i420(4, 4, vec![0; 5]);
        let outcome = controller.on_frame(broken);
        assert!(matches!(
            outcome,
            FrameOutcome::Dropped {
                error: PipelineError::Decode(_),
                ..
            }
        ));
        assert!(controller.engine.pending.lock().is_empty());
        assert!(!controller.is_busy());
    }

    #[test]
    fn mismatched_completion_is_stale() {
        let controller = controller(ManualEngine::default());
        controller.on_frame(grey_frame(3));

        let outcome = controller.on_mask(MaskResponse {
            sequence: 99,
            result: Ok(ConfidenceMask::from_fn(1, 1, |_, _| 1.0)),
        });
        assert_eq!(outcome, FrameOutcome::Stale { sequence: 99 });
        assert!(controller.is_busy());

        answer_all(&controller, 1.0);
        assert_eq!(controller.drain(), vec![FrameOutcome::Published { sequence: 3 }]);
    }

    #[test]
    fn engine_receives_upright_image() {
        let controller = controller(ManualEngine::default());
        let frame = PlanarFrame::i420(4, 2, vec![128; 12])
            .with_rotation(crate::capture::Rotation::Deg90);
        controller.on_frame(frame);

        let pending = controller.engine.pending.lock();
        assert_eq!(pending[0].0.image.dimensions(), (2, 4));
    }
}
