//! Synthetic (`stub://`) camera.
//!
//! Renders a dark table with sensor noise. A bright box slides across it
//! for part of each cycle and is missing for the rest, so the full
//! detect/debounce/stream loop can run without hardware.

use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, Pacer, SourceStats};
use crate::config::SourceSettings;
use crate::frame::Frame;

/// Frames per scene cycle.
pub const CYCLE_FRAMES: u64 = 120;
/// Frames of each cycle during which the box is visible.
pub const VISIBLE_FRAMES: u64 = 70;

const BACKGROUND: u8 = 40;
const BOX_LEVEL: u8 = 220;
const NOISE: i16 = 6;

pub struct SyntheticSource {
    settings: SourceSettings,
    frame_count: u64,
    rng: StdRng,
    pacer: Pacer,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            pacer: Pacer::new(settings.target_fps),
            settings,
            frame_count: 0,
            rng: StdRng::seed_from_u64(0x5eed_b0c5),
        }
    }

    /// Whether frame number `n` (1-based) shows the box.
    pub fn box_visible(n: u64) -> bool {
        (n.saturating_sub(1) % CYCLE_FRAMES) < VISIBLE_FRAMES
    }

    fn render(&mut self) -> RgbImage {
        let (w, h) = (self.settings.width, self.settings.height);
        let mut img = RgbImage::new(w, h);
        for pixel in img.pixels_mut() {
            let v = (BACKGROUND as i16 + self.rng.gen_range(-NOISE..=NOISE)).clamp(0, 255) as u8;
            *pixel = Rgb([v, v, v]);
        }

        if Self::box_visible(self.frame_count) {
            let side_w = (w / 4).max(1);
            let side_h = (h / 3).max(1);
            let phase = (self.frame_count.saturating_sub(1) % CYCLE_FRAMES) as u32;
            let travel = w.saturating_sub(side_w + w / 8);
            let x0 = w / 16 + travel * phase / VISIBLE_FRAMES as u32;
            let y0 = (h - side_h) / 2;
            for y in y0..(y0 + side_h).min(h) {
                for x in x0..(x0 + side_w).min(w) {
                    let v = (BOX_LEVEL as i16 + self.rng.gen_range(-NOISE..=NOISE)).clamp(0, 255) as u8;
                    img.put_pixel(x, y, Rgb([v, v, v.saturating_sub(20)]));
                }
            }
        }
        img
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{}, synthetic)",
            self.settings.url,
            self.settings.width,
            self.settings.height
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        self.pacer.wait();
        self.frame_count += 1;
        let image = self.render();
        Ok(Frame::new(image, self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.settings.url.clone(),
        }
    }
}
