//! Snapshot sink: writes a raw + annotated JPEG pair for one instant.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;

use crate::frame::encode_jpeg;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub raw: PathBuf,
    pub annotated: PathBuf,
    pub count: usize,
    pub frame_seq: u64,
}

#[derive(Clone, Debug)]
pub struct SnapshotSink {
    dir: PathBuf,
    quality: u8,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `raw_<stamp>.jpg` and `ann_<stamp>.jpg` into the samples directory.
    pub fn save(
        &self,
        raw: &RgbImage,
        annotated: &RgbImage,
        count: usize,
        frame_seq: u64,
    ) -> Result<SnapshotRecord> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create samples dir {}", self.dir.display()))?;
        let stamp = format!(
            "{}_{:06}",
            chrono::Local::now().format("%Y%m%d_%H%M%S%.3f"),
            frame_seq
        );
        let raw_path = self.dir.join(format!("raw_{}.jpg", stamp));
        let ann_path = self.dir.join(format!("ann_{}.jpg", stamp));

        std::fs::write(&raw_path, encode_jpeg(raw, self.quality)?)
            .with_context(|| format!("failed to write {}", raw_path.display()))?;
        std::fs::write(&ann_path, encode_jpeg(annotated, self.quality)?)
            .with_context(|| format!("failed to write {}", ann_path.display()))?;

        log::info!(
            "snapshot saved: {} / {} (boxes={})",
            raw_path.display(),
            ann_path.display(),
            count
        );
        Ok(SnapshotRecord {
            raw: raw_path,
            annotated: ann_path,
            count,
            frame_seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pair_into_fresh_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = SnapshotSink::new(dir.path().join("samples"), 80);
        let img = RgbImage::new(16, 12);
        let record = sink.save(&img, &img, 2, 41)?;
        assert!(record.raw.is_file());
        assert!(record.annotated.is_file());
        assert!(record
            .raw
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("raw_") && n.ends_with("_000041.jpg")));
        assert_eq!(record.count, 2);
        Ok(())
    }
}
