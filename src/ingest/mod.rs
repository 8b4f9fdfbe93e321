//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic scene (`stub://`), for tests and hardware-free demos
//! - Still image file (`file://` or a plain path), re-served every cycle
//! - USB/V4L2 devices (`v4l2://` or `/dev/video*`, feature: ingest-v4l2)
//!
//! Every source yields `Frame`s holding an RGB buffer. Capture failures are
//! returned as errors for the caller to treat as a skipped cycle.

mod normalize;
pub mod still;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use normalize::{normalize_to_rgb, PixelFormat};
pub use still::StillImageSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::frame::Frame;

/// A camera-like producer of frames.
pub trait FrameSource {
    /// Open the underlying device or file.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. Errors are transient from the caller's view.
    fn capture(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Box::new(StillImageSource::new(path, settings.target_fps)));
    }
    if url.starts_with("v4l2://") || url.starts_with("/dev/video") {
        return open_v4l2(settings);
    }
    if url.contains("://") {
        return Err(anyhow!("unsupported source scheme in {:?}", url));
    }
    Ok(Box::new(StillImageSource::new(url, settings.target_fps)))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let device = settings
        .url
        .trim()
        .strip_prefix("v4l2://")
        .unwrap_or(settings.url.trim())
        .to_string();
    Ok(Box::new(V4l2Source::new(v4l2::V4l2Config {
        device,
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "{} needs the ingest-v4l2 feature",
        settings.url.trim()
    ))
}

/// Sleeps just enough to hold a target frame rate.
#[derive(Clone, Debug)]
pub(crate) struct Pacer {
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        Self {
            interval: (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64)),
            next_due: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                thread::sleep(due - now);
            }
        }
        let base = self.next_due.map_or(now, |due| due.max(now));
        self.next_due = Some(base + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> SourceSettings {
        SourceSettings {
            url: url.to_string(),
            width: 64,
            height: 48,
            target_fps: 0,
        }
    }

    #[test]
    fn stub_scheme_opens_synthetic_source() -> Result<()> {
        let mut source = open_source(&settings("stub://bench"))?;
        source.connect()?;
        let frame = source.capture()?;
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(open_source(&settings("rtsp://camera/stream")).is_err());
    }

    #[test]
    fn pacer_without_rate_never_sleeps() {
        let mut pacer = Pacer::new(0);
        let start = Instant::now();
        for _ in 0..100 {
            pacer.wait();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
