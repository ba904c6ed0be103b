use super::{CaptureSource, FramePermits, PlanarFrame, Rotation};
use anyhow::{bail, Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

/// Webcam source delivering raw YUYV / NV12 buffers without RGB conversion.
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    rotation: Rotation,
    sequence: u64,
    permits: FramePermits,
}

impl WebcamCapture {
    pub fn new(
        device_index: u32,
        width: u32,
        height: u32,
        fps: u32,
        rotation: Rotation,
    ) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(width, height), FrameFormat::YUYV, fps),
        ));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let actual = camera.resolution();
        tracing::info!(
            "Webcam initialized: {}x{} {:?}",
            actual.width(),
            actual.height(),
            camera.frame_format()
        );

        Ok(Self {
            camera,
            width: actual.width(),
            height: actual.height(),
            rotation,
            sequence: 0,
            permits: FramePermits::new(3),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<PlanarFrame> {
        let Some(permit) = self.permits.try_acquire() else {
            bail!("all webcam frame buffers are still held downstream");
        };

        let buffer = self.camera.frame().context("Failed to capture frame")?;
        let resolution = buffer.resolution();
        let (width, height) = (resolution.width(), resolution.height());
        let data = buffer.buffer().to_vec();

        let frame = match buffer.source_frame_format() {
            FrameFormat::YUYV => PlanarFrame::yuyv(width, height, data),
            FrameFormat::NV12 => PlanarFrame::nv12(width, height, data),
            other => bail!("Unsupported webcam frame format {:?}", other),
        };

        let frame = frame
            .with_sequence(self.sequence)
            .with_rotation(self.rotation)
            .on_release(move || drop(permit));
        self.sequence += 1;

        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
