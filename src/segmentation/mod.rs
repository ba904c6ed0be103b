mod engine;
#[cfg(feature = "onnx")]
mod preprocess;
#[cfg(feature = "onnx")]
mod rvm;
pub mod types;

pub use engine::{MaskEngine, MaskRequest, MaskResponse, ThreadedMaskEngine};
#[cfg(feature = "onnx")]
pub use preprocess::Preprocessor;
#[cfg(feature = "onnx")]
pub use rvm::RobustVideoMatting;
pub use types::{ConfidenceMask, SegmentationModel};

#[cfg(feature = "onnx")]
use anyhow::Result;

/// Create a default segmentation model (RVM)
#[cfg(feature = "onnx")]
pub fn create_default_model(model_path: &str) -> Result<Box<dyn SegmentationModel>> {
    let model = RobustVideoMatting::new(model_path)?;
    Ok(Box::new(model))
}
