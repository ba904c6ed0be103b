mod loopback;

pub use loopback::V4L2Output;

use anyhow::Result;
use image::{imageops, Rgb, RgbImage, RgbaImage};

/// Trait for output destinations
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// What the cutout is drawn over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backdrop {
    /// The live preview, stretched to the output.
    Preview,
    /// A flat key colour.
    Solid(Rgb<u8>),
}

/// Flatten an RGBA overlay onto a backdrop the size of the overlay.
///
/// `preview` is only read for [`Backdrop::Preview`]; without one the
/// overlay goes over black.
pub fn flatten(overlay: &RgbaImage, backdrop: Backdrop, preview: Option<&RgbImage>) -> RgbImage {
    let (width, height) = overlay.dimensions();

    let mut base = match (backdrop, preview) {
        (Backdrop::Preview, Some(preview)) if preview.dimensions() == (width, height) => {
            preview.clone()
        }
        (Backdrop::Preview, Some(preview)) => {
            imageops::resize(preview, width, height, imageops::FilterType::Triangle)
        }
        (Backdrop::Preview, None) => RgbImage::new(width, height),
        (Backdrop::Solid(color), _) => RgbImage::from_pixel(width, height, color),
    };

    for (dst, src) in base.pixels_mut().zip(overlay.pixels()) {
        let alpha = src[3] as u16;
        if alpha == 0 {
            continue;
        }
        for channel in 0..3 {
            let over = src[channel] as u16 * alpha;
            let under = dst[channel] as u16 * (255 - alpha);
            dst[channel] = ((over + under + 127) / 255) as u8;
        }
    }

    base
}
