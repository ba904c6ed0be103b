//! Settings for the core pipeline, independent of where they came from.

use crate::capture::ChromaOrder;
use crate::composite::{MaskCompositor, OrientationPolicy, Resample};
use crate::decode::{ColorRange, PlanarImageDecoder};
use crate::display::SurfaceGeometry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub color_range: ColorRange,
    /// Overrides the chroma order frames declare.
    pub chroma_order: Option<ChromaOrder>,
    pub orientation: OrientationPolicy,
    pub resample: Resample,
    pub surface: SurfaceGeometry,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            color_range: ColorRange::Full,
            chroma_order: None,
            orientation: OrientationPolicy::FromHint,
            resample: Resample::Bilinear,
            surface: SurfaceGeometry::new(1280, 720, 0.0),
        }
    }
}

impl PipelineConfig {
    pub fn decoder(&self) -> PlanarImageDecoder {
        let decoder = PlanarImageDecoder::new(self.color_range);
        match self.chroma_order {
            Some(order) => decoder.with_chroma_order(order),
            None => decoder,
        }
    }

    pub fn compositor(&self) -> MaskCompositor {
        MaskCompositor::new(self.orientation, self.resample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PlanarFrame, Rotation};

    #[test]
    fn chroma_override_reaches_decoder() {
        let config = PipelineConfig {
            chroma_order: Some(ChromaOrder::CrCb),
            ..Default::default()
        };
        let frame = PlanarFrame::i420(2, 2, vec![128, 128, 128, 128, 90, 240]);
        let pixel = *config.decoder().decode(&frame).unwrap().get_pixel(0, 0);
        // Cr read as Cb: blue dominates.
        assert!(pixel[2] > pixel[0]);
    }

    #[test]
    fn fixed_orientation_reaches_compositor() {
        let config = PipelineConfig {
            orientation: OrientationPolicy::Fixed(Rotation::Deg90),
            ..Default::default()
        };
        assert_eq!(config.compositor().compensation(Rotation::Deg0), Rotation::Deg90);
    }
}
