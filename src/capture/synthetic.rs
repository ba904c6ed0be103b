use super::{CaptureSource, FramePermits, PlanarFrame, Rotation};
use anyhow::{bail, Result};

/// Test pattern source used when no camera backend is compiled in.
///
/// Produces I420 frames: a luma ramp that scrolls with the frame counter and a
/// saturated disc (the "subject") drifting across it, tagged with a fixed
/// rotation hint the way a sideways-mounted sensor would report it.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    rotation: Rotation,
    sequence: u64,
    permits: FramePermits,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32, rotation: Rotation) -> Self {
        tracing::info!(
            "Synthetic capture at {}x{}, rotation hint {}",
            width,
            height,
            rotation.degrees()
        );

        Self {
            width,
            height,
            rotation,
            sequence: 0,
            permits: FramePermits::new(3),
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let mut data = vec![128u8; w * h + 2 * cw * ch];

        let shift = self.sequence as usize;
        for y in 0..h {
            for x in 0..w {
                data[y * w + x] = ((x + y + shift) % 256) as u8;
            }
        }

        // Disc centre bounces horizontally, radius a quarter of the short side.
        let span = cw.max(1);
        let phase = shift % (2 * span);
        let cx = (if phase < span { phase } else { 2 * span - phase }) as i64;
        let cy = (ch / 2) as i64;
        let radius = (cw.min(ch) / 4).max(1) as i64;

        let (cb, cr) = data[w * h..].split_at_mut(cw * ch);
        for y in 0..ch {
            for x in 0..cw {
                let (dx, dy) = (x as i64 - cx, y as i64 - cy);
                if dx * dx + dy * dy <= radius * radius {
                    cb[y * cw + x] = 90;
                    cr[y * cw + x] = 240;
                }
            }
        }

        data
    }
}

impl CaptureSource for SyntheticCapture {
    fn capture_frame(&mut self) -> Result<PlanarFrame> {
        let Some(permit) = self.permits.try_acquire() else {
            bail!(
                "all {} synthetic frame buffers are still held downstream",
                self.permits.capacity()
            );
        };

        let data = self.render();
        let frame = PlanarFrame::i420(self.width, self.height, data)
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
