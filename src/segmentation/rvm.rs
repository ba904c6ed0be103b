use super::preprocess::Preprocessor;
use super::types::{ConfidenceMask, SegmentationModel};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{Array1, Array4, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
/// The alpha output is handed back untouched at model resolution and used
/// directly as the confidence mask.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,

    // Recurrent hidden states r1..r4, fed back in on the next frame
    states: Option<[Array4<f32>; 4]>,

    // Downsample ratio for hidden states
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Default Configuration
    /// - Input size: 256x256 (cutouts are thresholded, so a coarse mask is enough)
    /// - Downsample ratio: 0.25 (hidden states are 1/4 of input resolution)
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        let width = 256;
        let height = 256;

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
            states: None,
            downsample_ratio: 0.25,
        })
    }

    fn initial_states(&self) -> [Array4<f32>; 4] {
        let h = (self.height as f32 * self.downsample_ratio) as usize;
        let w = (self.width as f32 * self.downsample_ratio) as usize;

        tracing::debug!("Initializing hidden states to {}x{}", w, h);

        [
            Array4::zeros((1, 16, h, w)),
            Array4::zeros((1, 20, h / 2, w / 2)),
            Array4::zeros((1, 24, h / 4, w / 4)),
            Array4::zeros((1, 28, h / 8, w / 8)),
        ]
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbImage) -> Result<ConfidenceMask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        if self.states.is_none() {
            self.states = Some(self.initial_states());
        }

        let input_tensor = self.preprocessor.preprocess(frame)?;
        let ratio = Array1::from_elem(1, self.downsample_ratio);

        // RVM expects: src, r1i..r4i, downsample_ratio
        // and returns: fgr, pha, r1o..r4o
        let (pha, next_states) = {
            let Some([r1, r2, r3, r4]) = self.states.as_ref() else {
                bail!("RVM hidden states missing");
            };

            let _infer_span = tracing::debug_span!("inference").entered();
            let outputs = self
                .session
                .run(ort::inputs![
                    TensorRef::from_array_view(input_tensor.view())?,
                    TensorRef::from_array_view(r1.view())?,
                    TensorRef::from_array_view(r2.view())?,
                    TensorRef::from_array_view(r3.view())?,
                    TensorRef::from_array_view(r4.view())?,
                    TensorRef::from_array_view(ratio.view())?,
                ])
                .context("Failed to run inference")?;

            let pha = outputs[1]
                .try_extract_array::<f32>()?
                .to_owned()
                .into_dimensionality::<Ix4>()?;

            let mut next = Vec::with_capacity(4);
            for index in 2..6 {
                next.push(
                    outputs[index]
                        .try_extract_array::<f32>()?
                        .to_owned()
                        .into_dimensionality::<Ix4>()?,
                );
            }
            (pha, next)
        };

        if let Ok(states) = <[Array4<f32>; 4]>::try_from(next_states) {
            self.states = Some(states);
        }

        // Alpha shape: [1, 1, H, W]
        let (_, _, mask_height, mask_width) = pha.dim();
        let values: Vec<f32> = pha.iter().copied().collect();

        Ok(ConfidenceMask::new(
            mask_width as u32,
            mask_height as u32,
            values,
        )?)
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.states = None;
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
