//! Local still-image frame source.
//!
//! Decodes one image file on connect and re-serves it every cycle. Useful
//! for tuning thresholds against a captured sample.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::{FrameSource, Pacer, SourceStats};
use crate::frame::Frame;

pub struct StillImageSource {
    path: PathBuf,
    image: Option<Arc<RgbImage>>,
    frame_count: u64,
    pacer: Pacer,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>, target_fps: u32) -> Self {
        Self {
            path: path.into(),
            image: None,
            frame_count: 0,
            pacer: Pacer::new(target_fps),
        }
    }
}

impl FrameSource for StillImageSource {
    fn connect(&mut self) -> Result<()> {
        let image = image::open(&self.path)
            .with_context(|| format!("failed to decode image {}", self.path.display()))?
            .to_rgb8();
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            self.path.display(),
            image.width(),
            image.height()
        );
        self.image = Some(Arc::new(image));
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("image source {} not connected", self.path.display()))?;
        self.pacer.wait();
        self.frame_count += 1;
        Ok(Frame::new(RgbImage::clone(image), self.frame_count))
    }

    fn is_healthy(&self) -> bool {
        self.image.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.display().to_string(),
        }
    }
}
