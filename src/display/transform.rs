use image::{Rgba, RgbaImage};

/// 2D affine map `(x, y) -> (a x + c y + tx, b x + d y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Affine {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn scale(s: f32) -> Self {
        Self {
            a: s,
            d: s,
            ..Self::IDENTITY
        }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    /// Clockwise (in y-down screen space) rotation about `(cx, cy)`.
    pub fn rotate_about(degrees: f32, cx: f32, cy: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: cx - cos * cx + sin * cy,
            ty: cy - sin * cx - cos * cy,
        }
    }

    /// `self` first, then `next`.
    pub fn then(self, next: Self) -> Self {
        Self {
            a: next.a * self.a + next.c * self.b,
            b: next.b * self.a + next.d * self.b,
            c: next.a * self.c + next.c * self.d,
            d: next.b * self.c + next.d * self.d,
            tx: next.a * self.tx + next.c * self.ty + next.tx,
            ty: next.b * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.d * inv;
        let b = -self.b * inv;
        let c = -self.c * inv;
        let d = self.a * inv;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }
}

/// Everything a transform depends on. Compared whole to decide reuse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformKey {
    pub cutout: (u32, u32),
    pub surface: (u32, u32),
    pub rotation_degrees: f32,
}

/// Fit of a cutout into a display surface: uniform scale, rotation about the
/// cutout's centre, translation to the surface centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayTransform {
    pub scale: f32,
    pub rotation_degrees: f32,
    pub translation: (f32, f32),
    pub matrix: Affine,
}

impl DisplayTransform {
    /// `None` when the cutout or the surface has no area.
    pub fn compute(key: &TransformKey) -> Option<Self> {
        let (w, h) = (key.cutout.0 as f32, key.cutout.1 as f32);
        let (sw, sh) = (key.surface.0 as f32, key.surface.1 as f32);
        if w == 0.0 || h == 0.0 || sw == 0.0 || sh == 0.0 {
            return None;
        }

        // Bounding box of the rotated cutout, so the fit holds at any angle.
        let (sin, cos) = key.rotation_degrees.to_radians().sin_cos();
        let (sin, cos) = (snap(sin.abs()), snap(cos.abs()));
        let box_w = w * cos + h * sin;
        let box_h = w * sin + h * cos;
        let scale = (sw / box_w).min(sh / box_h);

        let (scaled_w, scaled_h) = (w * scale, h * scale);
        let translation = ((sw - scaled_w) / 2.0, (sh - scaled_h) / 2.0);

        let matrix = Affine::scale(scale)
            .then(Affine::rotate_about(
                key.rotation_degrees,
                scaled_w / 2.0,
                scaled_h / 2.0,
            ))
            .then(Affine::translate(translation.0, translation.1));

        Some(Self {
            scale,
            rotation_degrees: key.rotation_degrees,
            translation,
            matrix,
        })
    }

    /// Render `cutout` onto a transparent raster of `surface` size.
    ///
    /// Each destination pixel centre is mapped back into the cutout and
    /// sampled nearest-neighbour; pixels that land outside stay transparent.
    pub fn apply(&self, cutout: &RgbaImage, surface: (u32, u32)) -> RgbaImage {
        let _span = tracing::debug_span!("display_transform").entered();

        let mut out = RgbaImage::from_pixel(surface.0, surface.1, Rgba([0, 0, 0, 0]));
        let Some(inverse) = self.matrix.invert() else {
            return out;
        };
        let (cw, ch) = (cutout.width() as f32, cutout.height() as f32);

        // Only visit the destination box the cutout can reach.
        let corners =
            [(0.0, 0.0), (cw, 0.0), (0.0, ch), (cw, ch)].map(|(x, y)| self.matrix.apply(x, y));
        let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().max(0.0) as u32).min(surface.0);
        let y1 = (max_y.ceil().max(0.0) as u32).min(surface.1);

        for y in y0..y1 {
            for x in x0..x1 {
                let (sx, sy) = inverse.apply(x as f32 + 0.5, y as f32 + 0.5);
                if sx < 0.0 || sy < 0.0 || sx >= cw || sy >= ch {
                    continue;
                }
                out.put_pixel(x, y, *cutout.get_pixel(sx as u32, sy as u32));
            }
        }

        out
    }
}

/// Clean up sin/cos of right angles so 90 degrees does not leave 1e-8 residue.
fn snap(value: f32) -> f32 {
    if value < 1e-6 {
        0.0
    } else if (1.0 - value) < 1e-6 {
        1.0
    } else {
        value
    }
}

/// Memoised [`DisplayTransform`], invalidated by key comparison.
#[derive(Debug, Default)]
pub struct TransformCache {
    entry: Option<(TransformKey, DisplayTransform)>,
}

impl TransformCache {
    /// Reuse the cached transform when `key` matches, otherwise recompute.
    /// Returns `None`, leaving the cache untouched, when `key` has no area.
    pub fn get_or_compute(&mut self, key: TransformKey) -> Option<DisplayTransform> {
        if let Some((cached, transform)) = &self.entry {
            if *cached == key {
                return Some(*transform);
            }
        }
        let transform = DisplayTransform::compute(&key)?;
        tracing::debug!(
            "Display transform recomputed: cutout {:?} surface {:?} rotation {} scale {:.3}",
            key.cutout,
            key.surface,
            key.rotation_degrees,
            transform.scale
        );
        self.entry = Some((key, transform));
        Some(transform)
    }

    pub fn key(&self) -> Option<TransformKey> {
        self.entry.map(|(key, _)| key)
    }

    pub fn transform(&self) -> Option<DisplayTransform> {
        self.entry.map(|(_, transform)| transform)
    }
}
