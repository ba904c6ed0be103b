//! Mask compositing: upright RGB raster + confidence mask -> RGBA cutout.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage, RgbImage};

use crate::capture::Rotation;
use crate::error::CompositeError;
use crate::segmentation::ConfidenceMask;

/// Confidence at or above which a pixel is kept.
pub const FOREGROUND_THRESHOLD: f32 = 0.5;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Foreground test for one confidence value. NaN is background.
#[inline]
pub fn is_foreground(confidence: f32) -> bool {
    confidence >= FOREGROUND_THRESHOLD
}

/// How the compensating rotation before compositing is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrientationPolicy {
    /// Rotate by each frame's own rotation hint.
    #[default]
    FromHint,
    /// Always rotate by the same amount, whatever the frame reports.
    Fixed(Rotation),
}

/// Resampling used to bring the raster to the mask's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resample {
    Nearest,
    #[default]
    Bilinear,
}

impl Resample {
    fn filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaskCompositor {
    orientation: OrientationPolicy,
    resample: Resample,
}

impl MaskCompositor {
    pub fn new(orientation: OrientationPolicy, resample: Resample) -> Self {
        Self {
            orientation,
            resample,
        }
    }

    /// Rotation actually applied to a frame carrying `hint`.
    pub fn compensation(&self, hint: Rotation) -> Rotation {
        match self.orientation {
            OrientationPolicy::FromHint => hint,
            OrientationPolicy::Fixed(rotation) => rotation,
        }
    }

    /// Turn a sensor-oriented raster upright (clockwise rotation).
    pub fn orient(&self, raster: RgbImage, hint: Rotation) -> RgbImage {
        match self.compensation(hint) {
            Rotation::Deg0 => raster,
            Rotation::Deg90 => imageops::rotate90(&raster),
            Rotation::Deg180 => imageops::rotate180(&raster),
            Rotation::Deg270 => imageops::rotate270(&raster),
        }
    }

    /// Cut the subject out of an upright raster.
    ///
    /// The output has the mask's dimensions. Pixels with confidence
    /// `>= FOREGROUND_THRESHOLD` keep the resampled source colour at full
    /// opacity; everything else is fully transparent.
    pub fn composite(
        &self,
        upright: &RgbImage,
        mask: &ConfidenceMask,
    ) -> Result<RgbaImage, CompositeError> {
        let _span = tracing::debug_span!("composite").entered();

        let (width, height) = upright.dimensions();
        if width == 0 || height == 0 {
            return Err(CompositeError::EmptyRaster { width, height });
        }
        let (mask_width, mask_height) = mask.dimensions();
        if mask_width == 0 || mask_height == 0 {
            return Err(CompositeError::EmptyMask {
                width: mask_width,
                height: mask_height,
            });
        }
        let expected = mask_width as usize * mask_height as usize;
        if mask.values().len() != expected {
            return Err(CompositeError::MaskLength {
                expected,
                actual: mask.values().len(),
            });
        }

        let resized;
        let source = if (width, height) != (mask_width, mask_height) {
            resized = imageops::resize(upright, mask_width, mask_height, self.resample.filter());
            &resized
        } else {
            upright
        };

        let mut cutout = RgbaImage::new(mask_width, mask_height);
        for ((out, src), &confidence) in cutout
            .pixels_mut()
            .zip(source.pixels())
            .zip(mask.values())
        {
            *out = if is_foreground(confidence) {
                Rgba([src[0], src[1], src[2], 255])
            } else {
                TRANSPARENT
            };
        }

        Ok(cutout)
    }
}
