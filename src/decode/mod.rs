//! Planar luma/chroma to interleaved RGB conversion.

use image::RgbImage;

use crate::capture::{ChromaOrder, PlanarFrame, Plane};
use crate::error::{DecodeError, PlaneKind};

/// Quantisation range of the luma/chroma samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    /// JPEG / full swing: Y in 0..=255.
    #[default]
    Full,
    /// Studio swing: Y in 16..=235, chroma in 16..=240.
    Limited,
}

/// BT.601 coefficients, applied after centring chroma on zero.
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    luma_offset: f32,
    luma_gain: f32,
    r_cr: f32,
    g_cb: f32,
    g_cr: f32,
    b_cb: f32,
}

impl ColorRange {
    fn coefficients(self) -> Coefficients {
        match self {
            Self::Full => Coefficients {
                luma_offset: 0.0,
                luma_gain: 1.0,
                r_cr: 1.402,
                g_cb: 0.344_136,
                g_cr: 0.714_136,
                b_cb: 1.772,
            },
            Self::Limited => Coefficients {
                luma_offset: 16.0,
                luma_gain: 1.164,
                r_cr: 1.596,
                g_cb: 0.392,
                g_cr: 0.813,
                b_cb: 2.017,
            },
        }
    }
}

/// Converts [`PlanarFrame`]s to [`RgbImage`]s of the same size.
///
/// Chroma is upsampled nearest-neighbour. Which chroma plane is Cb is taken
/// from the frame's [`ChromaOrder`] unless an override is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarImageDecoder {
    range: ColorRange,
    chroma_order: Option<ChromaOrder>,
}

impl PlanarImageDecoder {
    pub fn new(range: ColorRange) -> Self {
        Self {
            range,
            chroma_order: None,
        }
    }

    /// Force a chroma order regardless of what frames declare.
    pub fn with_chroma_order(mut self, order: ChromaOrder) -> Self {
        self.chroma_order = Some(order);
        self
    }

    pub fn decode(&self, frame: &PlanarFrame) -> Result<RgbImage, DecodeError> {
        let _span = tracing::debug_span!("decode", sequence = frame.sequence()).entered();

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroExtent { width, height });
        }

        let luma = checked_plane(frame, PlaneKind::Luma)?;
        let chroma_a = checked_plane(frame, PlaneKind::ChromaA)?;
        let chroma_b = checked_plane(frame, PlaneKind::ChromaB)?;

        let (cb, cr) = match self.chroma_order.unwrap_or(frame.chroma_order()) {
            ChromaOrder::CbCr => (chroma_a, chroma_b),
            ChromaOrder::CrCb => (chroma_b, chroma_a),
        };

        let k = self.range.coefficients();
        let (w, h) = (width as usize, height as usize);
        let mut rgb = vec![0u8; w * h * 3];

        let (cb_h, cb_v) = subsampling(cb);
        let (cr_h, cr_v) = subsampling(cr);

        for (y, out_row) in rgb.chunks_exact_mut(w * 3).enumerate() {
            let y_row = luma.row_start(y);
            let cb_row = cb.row_start(y / cb_v);
            let cr_row = cr.row_start(y / cr_v);

            for (x, out) in out_row.chunks_exact_mut(3).enumerate() {
                let l = luma.data()[y_row + x * luma.pixel_stride()] as f32;
                let u = cb.data()[cb_row + (x / cb_h) * cb.pixel_stride()] as f32 - 128.0;
                let v = cr.data()[cr_row + (x / cr_h) * cr.pixel_stride()] as f32 - 128.0;

                let l = (l - k.luma_offset) * k.luma_gain;
                out[0] = to_channel(l + k.r_cr * v);
                out[1] = to_channel(l - k.g_cb * u - k.g_cr * v);
                out[2] = to_channel(l + k.b_cb * u);
            }
        }

        // Length is exactly w * h * 3, so this cannot fail.
        RgbImage::from_raw(width, height, rgb).ok_or(DecodeError::ZeroExtent { width, height })
    }
}

fn checked_plane(frame: &PlanarFrame, kind: PlaneKind) -> Result<&Plane, DecodeError> {
    let plane = frame
        .plane(kind)
        .ok_or(DecodeError::MissingPlane { plane: kind })?;

    let sub = plane.subsampling();
    if plane.row_stride() == 0 || sub.horizontal == 0 || sub.vertical == 0 {
        return Err(DecodeError::InvalidLayout { plane: kind });
    }
    // A zero pixel stride is only legal for a single-column grid.
    if plane.pixel_stride() == 0 && plane.grid(frame.width(), frame.height()).0 > 1 {
        return Err(DecodeError::InvalidLayout { plane: kind });
    }

    let required = plane
        .required_len(frame.width(), frame.height())
        .ok_or(DecodeError::InvalidLayout { plane: kind })?;
    if plane.data().len() < required {
        return Err(DecodeError::UndersizedPlane {
            plane: kind,
            required,
            actual: plane.data().len(),
        });
    }

    Ok(plane)
}

fn subsampling(plane: &Plane) -> (usize, usize) {
    let sub = plane.subsampling();
    (sub.horizontal as usize, sub.vertical as usize)
}

#[inline]
fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Subsampling;

    fn pixels(image: &RgbImage) -> Vec<[u8; 3]> {
        image.pixels().map(|p| p.0).collect()
    }

    #[test]
    fn decodes_known_2x2_frame() {
        // Y = [16, 81, 145, 235], Cb = 90, Cr = 240
        let frame = PlanarFrame::i420(2, 2, vec![16, 81, 145, 235, 90, 240]);
        let rgb = PlanarImageDecoder::default().decode(&frame).unwrap();

        // Cb' = -38, Cr' = 112:
        //   R = Y + 157.024, G = Y + 13.077168 - 79.983232, B = Y - 67.336
        assert_eq!(
            pixels(&rgb),
            vec![[173, 0, 0], [238, 14, 14], [255, 78, 78], [255, 168, 168]]
        );
    }

    #[test]
    fn neutral_chroma_is_grey() {
        let frame = PlanarFrame::i420(2, 2, vec![0, 64, 128, 255, 128, 128]);
        let rgb = PlanarImageDecoder::default().decode(&frame).unwrap();
        assert_eq!(
            pixels(&rgb),
            vec![[0, 0, 0], [64, 64, 64], [128, 128, 128], [255, 255, 255]]
        );
    }

    #[test]
    fn limited_range_black_and_white() {
        let frame = PlanarFrame::i420(2, 1, vec![16, 235, 128, 128]);
        let rgb = PlanarImageDecoder::new(ColorRange::Limited)
            .decode(&frame)
            .unwrap();
        assert_eq!(pixels(&rgb), vec![[0, 0, 0], [255, 255, 255]]);
    }

    #[test]
    fn semi_planar_and_packed_layouts_match_planar() {
        let y = [16u8, 81, 145, 235];
        let (cb, cr) = (90u8, 240u8);
        let decoder = PlanarImageDecoder::default();

        let planar = decoder
            .decode(&PlanarFrame::i420(2, 2, vec![y[0], y[1], y[2], y[3], cb, cr]))
            .unwrap();
        let nv12 = decoder
            .decode(&PlanarFrame::nv12(2, 2, vec![y[0], y[1], y[2], y[3], cb, cr]))
            .unwrap();
        let nv21 = decoder
            .decode(&PlanarFrame::nv21(2, 2, vec![y[0], y[1], y[2], y[3], cr, cb]))
            .unwrap();
        // YUYV is 4:2:2, so both rows carry their own (identical) chroma pair.
        let yuyv = decoder
            .decode(&PlanarFrame::yuyv(
                2,
                2,
                vec![y[0], cb, y[1], cr, y[2], cb, y[3], cr],
            ))
            .unwrap();

        assert_eq!(planar, nv12);
        assert_eq!(planar, nv21);
        assert_eq!(planar, yuyv);
    }

    #[test]
    fn chroma_order_override_swaps_planes() {
        let frame = PlanarFrame::i420(2, 2, vec![128, 128, 128, 128, 90, 240]);
        let normal = PlanarImageDecoder::default().decode(&frame).unwrap();
        let swapped = PlanarImageDecoder::default()
            .with_chroma_order(ChromaOrder::CrCb)
            .decode(&frame)
            .unwrap();

        // Cr high reads red; read as Cb it turns blue.
        assert!(normal.get_pixel(0, 0)[0] > normal.get_pixel(0, 0)[2]);
        assert!(swapped.get_pixel(0, 0)[2] > swapped.get_pixel(0, 0)[0]);
    }

    #[test]
    fn honours_row_stride_padding() {
        // Luma rows padded to 4 bytes; padding bytes must be ignored.
        let luma = Plane::new(vec![10, 20, 99, 99, 30, 40, 99, 99], 4, 1, Subsampling::NONE);
        let cb = Plane::new(vec![128, 99, 99, 99], 4, 1, Subsampling::YUV420);
        let cr = Plane::new(vec![128, 99, 99, 99], 4, 1, Subsampling::YUV420);
        let frame = PlanarFrame::new(2, 2, [Some(luma), Some(cb), Some(cr)]);

        let rgb = PlanarImageDecoder::default().decode(&frame).unwrap();
        assert_eq!(
            pixels(&rgb),
            vec![[10, 10, 10], [20, 20, 20], [30, 30, 30], [40, 40, 40]]
        );
    }

    #[test]
    fn missing_plane_fails() {
        let luma = Plane::new(vec![0; 4], 2, 1, Subsampling::NONE);
        let cb = Plane::new(vec![128], 1, 1, Subsampling::YUV420);
        let frame = PlanarFrame::new(2, 2, [Some(luma), Some(cb), None]);

        let err = PlanarImageDecoder::default().decode(&frame).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingPlane {
                plane: PlaneKind::ChromaB
            }
        );
    }

    #[test]
    fn undersized_plane_fails() {
        let frame = PlanarFrame::i420(4, 4, vec![0; 18]);
        let err = PlanarImageDecoder::default().decode(&frame).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UndersizedPlane {
                plane: PlaneKind::ChromaA,
                ..
            }
        ));
    }

    #[test]
    fn overflowing_stride_is_invalid_layout() {
        let chroma = || Plane::new(vec![128u8; 1], 1, 1, Subsampling::YUV420);
        let luma = Plane::new(vec![0u8; 4], usize::MAX, 1, Subsampling::NONE);
        let frame = PlanarFrame::new(2, 2, [Some(luma), Some(chroma()), Some(chroma())]);

        assert_eq!(
            PlanarImageDecoder::default().decode(&frame).unwrap_err(),
            DecodeError::InvalidLayout {
                plane: PlaneKind::Luma
            }
        );
    }

    #[test]
    fn zero_extent_fails() {
        let frame = PlanarFrame::i420(0, 2, Vec::new());
        assert_eq!(
            PlanarImageDecoder::default().decode(&frame).unwrap_err(),
            DecodeError::ZeroExtent {
                width: 0,
                height: 2
            }
        );
    }
}
