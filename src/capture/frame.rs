use std::fmt;
use std::sync::Arc;

use crate::error::PlaneKind;

/// Chroma subsampling factor of a plane relative to the luma grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsampling {
    pub horizontal: u32,
    pub vertical: u32,
}

impl Subsampling {
    /// Native resolution (luma, or 4:4:4 chroma).
    pub const NONE: Self = Self::new(1, 1);
    /// 4:2:0 chroma: half resolution in both directions.
    pub const YUV420: Self = Self::new(2, 2);
    /// 4:2:2 chroma: half horizontal resolution.
    pub const YUV422: Self = Self::new(2, 1);

    pub const fn new(horizontal: u32, vertical: u32) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }
}

/// Which colour-difference component the second plane carries.
///
/// Sensors and formats disagree here (NV12 stores Cb first, NV21 stores Cr
/// first), so the decoder is told rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromaOrder {
    /// chroma-a is Cb (U), chroma-b is Cr (V).
    #[default]
    CbCr,
    /// chroma-a is Cr (V), chroma-b is Cb (U).
    CrCb,
}

/// Clockwise rotation needed to turn a captured frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts any multiple of 90, negative values included.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        Some(match degrees.rem_euclid(360) {
            0 => Self::Deg0,
            90 => Self::Deg90,
            180 => Self::Deg180,
            _ => Self::Deg270,
        })
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// True when the rotation swaps width and height.
    pub fn is_transposing(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// One sample plane: a view into a (possibly shared) byte buffer.
///
/// Sample `(col, row)` of the plane's own grid lives at
/// `offset + row * row_stride + col * pixel_stride`. Semi-planar and packed
/// layouts are described by pointing several planes at the same buffer with
/// different offsets and pixel strides.
#[derive(Clone)]
pub struct Plane {
    data: Arc<[u8]>,
    offset: usize,
    row_stride: usize,
    pixel_stride: usize,
    subsampling: Subsampling,
}

impl Plane {
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        row_stride: usize,
        pixel_stride: usize,
        subsampling: Subsampling,
    ) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            row_stride,
            pixel_stride,
            subsampling,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn subsampling(&self) -> Subsampling {
        self.subsampling
    }

    /// Dimensions of this plane's sample grid for a frame of `width`x`height`.
    pub fn grid(&self, width: u32, height: u32) -> (u32, u32) {
        (
            width.div_ceil(self.subsampling.horizontal.max(1)),
            height.div_ceil(self.subsampling.vertical.max(1)),
        )
    }

    /// Minimum buffer length addressing every sample of the grid, or `None`
    /// when the strides put the last sample beyond `usize`.
    pub fn required_len(&self, width: u32, height: u32) -> Option<usize> {
        let (cols, rows) = self.grid(width, height);
        if cols == 0 || rows == 0 {
            return Some(self.offset);
        }
        let last_row = (rows as usize - 1).checked_mul(self.row_stride)?;
        let last_col = (cols as usize - 1).checked_mul(self.pixel_stride)?;
        self.offset
            .checked_add(last_row)?
            .checked_add(last_col)?
            .checked_add(1)
    }

    #[inline]
    pub(crate) fn row_start(&self, row: usize) -> usize {
        self.offset + row * self.row_stride
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("len", &self.data.len())
            .field("offset", &self.offset)
            .field("row_stride", &self.row_stride)
            .field("pixel_stride", &self.pixel_stride)
            .field("subsampling", &self.subsampling)
            .finish()
    }
}

/// Runs once when a frame is dropped, returning its buffer to the source.
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A captured luma/chroma frame.
///
/// The frame owns its capture resource: whichever stage holds it last
/// releases it simply by dropping it, so the release hook runs exactly once
/// on every path (success, decode failure, engine failure, skip).
pub struct PlanarFrame {
    sequence: u64,
    width: u32,
    height: u32,
    planes: [Option<Plane>; 3],
    chroma_order: ChromaOrder,
    rotation: Rotation,
    release: Option<ReleaseHook>,
}

impl PlanarFrame {
    /// Planes are `[luma, chroma-a, chroma-b]`; any may be absent.
    pub fn new(width: u32, height: u32, planes: [Option<Plane>; 3]) -> Self {
        Self {
            sequence: 0,
            width,
            height,
            planes,
            chroma_order: ChromaOrder::CbCr,
            rotation: Rotation::Deg0,
            release: None,
        }
    }

    /// Fully planar 4:2:0 (I420 / YU12): Y, then U, then V.
    pub fn i420(width: u32, height: u32, data: Vec<u8>) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let data: Arc<[u8]> = data.into();

        let luma = Plane::new(data.clone(), w, 1, Subsampling::NONE);
        let cb = Plane::new(data.clone(), cw, 1, Subsampling::YUV420).with_offset(w * h);
        let cr = Plane::new(data, cw, 1, Subsampling::YUV420).with_offset(w * h + cw * ch);

        Self::new(width, height, [Some(luma), Some(cb), Some(cr)])
    }

    /// Semi-planar 4:2:0 with interleaved Cb/Cr pairs.
    pub fn nv12(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::semi_planar(width, height, data).with_chroma_order(ChromaOrder::CbCr)
    }

    /// Semi-planar 4:2:0 with interleaved Cr/Cb pairs (Android camera default).
    pub fn nv21(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::semi_planar(width, height, data).with_chroma_order(ChromaOrder::CrCb)
    }

    fn semi_planar(width: u32, height: u32, data: Vec<u8>) -> Self {
        let (w, h) = (width as usize, height as usize);
        let row = w.div_ceil(2) * 2;
        let data: Arc<[u8]> = data.into();

        let luma = Plane::new(data.clone(), w, 1, Subsampling::NONE);
        let first = Plane::new(data.clone(), row, 2, Subsampling::YUV420).with_offset(w * h);
        let second = Plane::new(data, row, 2, Subsampling::YUV420).with_offset(w * h + 1);

        Self::new(width, height, [Some(luma), Some(first), Some(second)])
    }

    /// Packed 4:2:2 as delivered by most UVC webcams: `Y0 U Y1 V`.
    pub fn yuyv(width: u32, height: u32, data: Vec<u8>) -> Self {
        let row = (width as usize).div_ceil(2) * 4;
        let data: Arc<[u8]> = data.into();

        let luma = Plane::new(data.clone(), row, 2, Subsampling::NONE);
        let cb = Plane::new(data.clone(), row, 4, Subsampling::YUV422).with_offset(1);
        let cr = Plane::new(data, row, 4, Subsampling::YUV422).with_offset(3);

        Self::new(width, height, [Some(luma), Some(cb), Some(cr)])
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_chroma_order(mut self, order: ChromaOrder) -> Self {
        self.chroma_order = order;
        self
    }

    /// Attach the hook that hands the backing buffer back to the source.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
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

    pub fn chroma_order(&self) -> ChromaOrder {
        self.chroma_order
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn plane(&self, kind: PlaneKind) -> Option<&Plane> {
        let index = match kind {
            PlaneKind::Luma => 0,
            PlaneKind::ChromaA => 1,
            PlaneKind::ChromaB => 2,
        };
        self.planes[index].as_ref()
    }
}

impl Drop for PlanarFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for PlanarFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanarFrame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("planes", &self.planes)
            .field("chroma_order", &self.chroma_order)
            .field("rotation", &self.rotation)
            .finish()
    }
}
