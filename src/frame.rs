//! Captured frames.
//!
//! A `Frame` wraps an immutable RGB buffer behind an `Arc` so the capture
//! loop, the inference worker and the stream hub can all hold the same
//! capture without copying pixels. Detection never writes into it; anything
//! that draws works on `working_copy()`.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    pub captured_at: Instant,
    /// Monotonic per-source sequence number, starting at 1.
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
            seq,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }

    /// Owned copy that may be annotated.
    pub fn working_copy(&self) -> RgbImage {
        (*self.image).clone()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn area(&self) -> f64 {
        self.width() as f64 * self.height() as f64
    }
}

/// Baseline JPEG at `quality` (1..=100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity((image.width() * image.height()) as usize / 4);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("jpeg encode failed")?;
    Ok(out)
}
