//! Fitting cutouts onto the display surface and publishing them to the renderer.

mod transform;

pub use transform::{Affine, DisplayTransform, TransformCache, TransformKey};

use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;

use crate::error::PipelineError;

/// What the render surface currently looks like.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub width: u32,
    pub height: u32,
    /// Device rotation, degrees clockwise. Any value, not just right angles.
    pub rotation_degrees: f32,
}

impl SurfaceGeometry {
    pub fn new(width: u32, height: u32, rotation_degrees: f32) -> Self {
        Self {
            width,
            height,
            rotation_degrees,
        }
    }

    pub fn is_laid_out(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// One published result: the transform and the raster it produced, together.
#[derive(Debug)]
pub struct Presentation {
    /// Sequence number of the frame the cutout came from.
    pub sequence: u64,
    pub transform: DisplayTransform,
    pub raster: RgbaImage,
}

struct TransformerState {
    geometry: SurfaceGeometry,
    cache: TransformCache,
    cutout: Option<(u64, Arc<RgbaImage>)>,
}

/// Owns the transform cache and the latest presentation.
///
/// Writers (the pipeline on a new cutout, the UI on resize or rotation)
/// serialise on an internal lock; the renderer only ever sees complete
/// [`Presentation`]s through [`latest`](Self::latest).
pub struct DisplayTransformer {
    state: Mutex<TransformerState>,
    published: Mutex<Option<Arc<Presentation>>>,
}

impl DisplayTransformer {
    pub fn new(geometry: SurfaceGeometry) -> Self {
        Self {
            state: Mutex::new(TransformerState {
                geometry,
                cache: TransformCache::default(),
                cutout: None,
            }),
            published: Mutex::new(None),
        }
    }

    /// Take a fresh cutout, superseding the previous one, and publish it.
    pub fn present(
        &self,
        cutout: RgbaImage,
        sequence: u64,
    ) -> Result<Arc<Presentation>, PipelineError> {
        let mut state = self.state.lock();
        state.cutout = Some((sequence, Arc::new(cutout)));
        self.render(&mut state)
    }

    /// The surface was laid out again.
    pub fn resize(&self, width: u32, height: u32) -> Result<Arc<Presentation>, PipelineError> {
        let mut state = self.state.lock();
        state.geometry.width = width;
        state.geometry.height = height;
        self.render(&mut state)
    }

    /// The device was turned.
    pub fn set_rotation(&self, degrees: f32) -> Result<Arc<Presentation>, PipelineError> {
        let mut state = self.state.lock();
        state.geometry.rotation_degrees = degrees;
        self.render(&mut state)
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.state.lock().geometry
    }

    /// The transform the last render used, if any.
    pub fn transform(&self) -> Option<DisplayTransform> {
        self.state.lock().cache.transform()
    }

    /// What the renderer should draw next.
    pub fn latest(&self) -> Option<Arc<Presentation>> {
        self.published.lock().clone()
    }

    fn render(&self, state: &mut TransformerState) -> Result<Arc<Presentation>, PipelineError> {
        let geometry = state.geometry;
        if !geometry.is_laid_out() {
            tracing::debug!(
                "Surface {}x{} not laid out, keeping last presentation",
                geometry.width,
                geometry.height
            );
            return Err(PipelineError::NotReady {
                width: geometry.width,
                height: geometry.height,
            });
        }

        let Some((sequence, cutout)) = state.cutout.clone() else {
            // Nothing to show yet; the geometry is remembered for the first cutout.
            return Err(PipelineError::NotReady {
                width: geometry.width,
                height: geometry.height,
            });
        };

        let key = TransformKey {
            cutout: cutout.dimensions(),
            surface: (geometry.width, geometry.height),
            rotation_degrees: geometry.rotation_degrees,
        };
        let transform = state
            .cache
            .get_or_compute(key)
            .ok_or(PipelineError::NotReady {
                width: geometry.width,
                height: geometry.height,
            })?;

        let raster = transform.apply(&cutout, key.surface);
        let presentation = Arc::new(Presentation {
            sequence,
            transform,
            raster,
        });

        *self.published.lock() = Some(presentation.clone());
        Ok(presentation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]))
    }

    #[test]
    fn present_publishes_surface_sized_raster() {
        let transformer = DisplayTransformer::new(SurfaceGeometry::new(64, 32, 0.0));
        let presentation = transformer.present(solid(16, 16), 3).unwrap();

        assert_eq!(presentation.sequence, 3);
        assert_eq!(presentation.raster.dimensions(), (64, 32));
        assert_eq!(presentation.transform.scale, 2.0);
        assert_eq!(transformer.latest().unwrap().sequence, 3);
    }

    #[test]
    fn resize_reflects_latest_dimensions() {
        let transformer = DisplayTransformer::new(SurfaceGeometry::new(100, 100, 0.0));
        transformer.present(solid(10, 10), 1).unwrap();

        for (w, h) in [(200, 50), (30, 90), (640, 480)] {
            transformer.resize(w, h).unwrap();
            let latest = transformer.latest().unwrap();
            assert_eq!(latest.raster.dimensions(), (w, h));
            assert_eq!(transformer.transform().unwrap(), latest.transform);
        }
        assert_eq!(transformer.transform().unwrap().scale, 48.0);
    }

    #[test]
    fn rotation_update_recomputes_transform() {
        let transformer = DisplayTransformer::new(SurfaceGeometry::new(100, 100, 0.0));
        transformer.present(solid(10, 10), 1).unwrap();
        transformer.set_rotation(45.0).unwrap();

        let transform = transformer.transform().unwrap();
        assert_eq!(transform.rotation_degrees, 45.0);
        assert!(transform.scale < 10.0);
        assert_eq!(transformer.geometry().rotation_degrees, 45.0);
    }

    #[test]
    fn zero_surface_is_not_ready_and_keeps_last_presentation() {
        let transformer = DisplayTransformer::new(SurfaceGeometry::new(50, 50, 0.0));
        transformer.present(solid(5, 5), 1).unwrap();

        let err = transformer.resize(0, 0).unwrap_err();
        assert_eq!(
            err,
            PipelineError::NotReady {
                width: 0,
                height: 0
            }
        );
        let err = transformer.present(solid(5, 5), 2).unwrap_err();
        assert!(matches!(err, PipelineError::NotReady { .. }));

        let latest = transformer.latest().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.raster.dimensions(), (50, 50));
        assert_eq!(transformer.transform().unwrap().scale, 10.0);
    }

    #[test]
    fn pending_cutout_renders_once_laid_out() {
        let transformer = DisplayTransformer::new(SurfaceGeometry::new(0, 0, 0.0));
        assert!(transformer.present(solid(4, 4), 9).is_err());
        assert!(transformer.latest().is_none());

        let presentation = transformer.resize(8, 8).unwrap();
        assert_eq!(presentation.sequence, 9);
        assert_eq!(presentation.raster.dimensions(), (8, 8));
    }

    #[test]
    fn resize_without_cutout_is_not_ready() {
        let transformer = DisplayTransformer::new(SurfaceGeometry::new(10, 10, 0.0));
        assert!(transformer.resize(20, 20).is_err());
        assert_eq!(transformer.geometry().width, 20);
    }
}
