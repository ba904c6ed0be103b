//! Live subject cutout: planar camera frames plus segmentation masks in,
//! transparent-background cutouts fitted to a display surface out.

pub mod capture;
pub mod composite;
pub mod config;
pub mod decode;
pub mod display;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod segmentation;

pub use config::PipelineConfig;
pub use error::{CompositeError, DecodeError, EngineError, PipelineError};
pub use pipeline::{FrameOutcome, FramePipelineController, FrameState};
