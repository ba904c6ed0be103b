use anyhow::Result;
use image::{GrayImage, Luma, RgbImage};

use crate::error::CompositeError;

/// Per-pixel foreground probability, row-major, values in 0.0..=1.0.
///
/// The mask's own dimensions are authoritative: it is usually smaller than
/// the frame it was computed from, and the source raster is resampled to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceMask {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl ConfidenceMask {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self, CompositeError> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(CompositeError::MaskLength {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut values = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                values.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Greyscale view of the mask for debugging output.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let value = self.get(x, y).unwrap_or(0.0);
            Luma([(value * 255.0).clamp(0.0, 255.0) as u8])
        })
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
pub trait SegmentationModel: Send {
    /// Process an upright frame and return a confidence mask
    ///
    /// The mask is returned at the model's native output size; callers
    /// resample the frame to it, never the other way round.
    fn segment(&mut self, frame: &RgbImage) -> Result<ConfidenceMask>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Call this when:
    /// - Switching cameras
    /// - Scene cuts detected
    /// - Starting a new video session
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Get the output dimensions (usually matches input)
    ///
    /// Returns (width, height)
    fn output_size(&self) -> (u32, u32) {
        self.input_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = ConfidenceMask::new(2, 2, vec![0.0; 3]).unwrap_err();
        assert_eq!(
            err,
            CompositeError::MaskLength {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn indexes_row_major() {
        let mask = ConfidenceMask::new(3, 2, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]).unwrap();
        assert_eq!(mask.get(1, 1), Some(0.4));
        assert_eq!(mask.get(3, 0), None);

        let built = ConfidenceMask::from_fn(3, 2, |x, y| (y * 3 + x) as f32 / 10.0);
        assert_eq!(built.get(2, 1), Some(0.5));
    }

    #[test]
    fn luma_view_scales_to_bytes() {
        let mask = ConfidenceMask::new(2, 1, vec![0.0, 1.0]).unwrap();
        let gray = mask.to_luma();
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 255);
    }
}
