mod frame;
mod permits;
mod synthetic;
#[cfg(feature = "camera")]
mod v4l_capture;

pub use frame::{ChromaOrder, PlanarFrame, Plane, ReleaseHook, Rotation, Subsampling};
pub use permits::{FramePermit, FramePermits};
pub use synthetic::SyntheticCapture;
#[cfg(feature = "camera")]
pub use v4l_capture::WebcamCapture;

use anyhow::Result;

/// Trait for camera capture sources
///
/// Frames come out in the sensor's native luma/chroma layout together with
/// the rotation needed to show them upright. Every frame must eventually be
/// dropped so its buffer goes back to the source.
pub trait CaptureSource {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<PlanarFrame>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
