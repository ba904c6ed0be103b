use super::OutputSink;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Raw YUYV writer for a v4l2loopback device node.
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    yuyv: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
            yuyv: Vec::with_capacity(yuyv_len(width, height)),
        })
    }
}

fn yuyv_len(width: u32, height: u32) -> usize {
    (width as usize).div_ceil(2) * 4 * height as usize
}

/// Pack an RGB frame as YUYV (4:2:2), chroma averaged over each pixel pair.
/// An odd last column is paired with itself.
pub(crate) fn rgb_to_yuyv(rgb: &RgbImage, out: &mut Vec<u8>) {
    let (width, height) = rgb.dimensions();
    out.clear();
    out.reserve(yuyv_len(width, height));

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let left = rgb.get_pixel(x, y);
            let right = if x + 1 < width {
                rgb.get_pixel(x + 1, y)
            } else {
                left
            };

            let (y0, cb0, cr0) = rgb_to_ycbcr(left.0);
            let (y1, cb1, cr1) = rgb_to_ycbcr(right.0);

            out.extend_from_slice(&[
                y0,
                ((cb0 as u16 + cb1 as u16 + 1) / 2) as u8,
                y1,
                ((cr0 as u16 + cr1 as u16 + 1) / 2) as u8,
            ]);
        }
    }
}

/// BT.601 studio-swing YCbCr, what most V4L2 consumers assume for YUYV.
fn rgb_to_ycbcr([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);

    let y = 16.0 + 0.257 * r + 0.504 * g + 0.098 * b;
    let cb = 128.0 - 0.148 * r - 0.291 * g + 0.439 * b;
    let cr = 128.0 + 0.439 * r - 0.368 * g - 0.071 * b;

    let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    (clamp(y), clamp(cb), clamp(cr))
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            resized = imageops::resize(
                frame,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        rgb_to_yuyv(frame, &mut self.yuyv);

        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn black_and_white_hit_studio_range() {
        assert_eq!(rgb_to_ycbcr([0, 0, 0]), (16, 128, 128));
        assert_eq!(rgb_to_ycbcr([255, 255, 255]), (235, 128, 128));
    }

    #[test]
    fn packs_pairs_and_pads_odd_width() {
        let image = RgbImage::from_pixel(3, 2, Rgb([0, 0, 0]));
        let mut out = Vec::new();
        rgb_to_yuyv(&image, &mut out);

        assert_eq!(out.len(), yuyv_len(3, 2));
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..4], &[16, 128, 16, 128]);
    }
}
