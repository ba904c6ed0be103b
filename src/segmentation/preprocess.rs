use anyhow::Result;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Turns upright frames into the `[1, 3, H, W]` float tensor a model expects.
pub struct Preprocessor {
    input: (u32, u32),
}

impl Preprocessor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            input: (width, height),
        }
    }

    /// Resize to the model input (bilinear), scale samples to `0.0..=1.0`
    /// and lay the channels out planar.
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (width, height) = self.input;
        let resized;
        let source = if image.dimensions() == self.input {
            image
        } else {
            resized = imageops::resize(image, width, height, imageops::FilterType::Triangle);
            &resized
        };

        let shape = (1, 3, height as usize, width as usize);
        Ok(Array4::from_shape_fn(shape, |(_, channel, y, x)| {
            source.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn tensor_is_nchw_and_normalized() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 51]));
        let tensor = Preprocessor::new(4, 2).preprocess(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert_eq!(tensor[[0, 0, 1, 3]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn resizes_to_model_input() {
        let image = RgbImage::new(10, 10);
        let tensor = Preprocessor::new(8, 6).preprocess(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 6, 8]);
    }
}
