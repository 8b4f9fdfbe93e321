//! Neural box detection: letterbox, forward pass, decode, NMS and a
//! box-likeness filter on the survivors.

mod decode;
mod letterbox;
mod nms;

pub use decode::{decode, layout, Layout, ScoredBox, BOX_ATTRIBUTES};
pub use letterbox::{to_nchw, Letterbox};
pub use nms::non_max_suppression;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use crate::config::NeuralSettings;
use crate::detect::backend::{BoxDetector, InferenceBackend};
use crate::detect::result::DetectionResult;
use crate::frame::Frame;
use crate::geometry::{AxisRect, Candidate, Region};

/// First candidate model path that exists on disk.
pub fn discover_model<P: AsRef<Path>>(candidates: &[P]) -> Result<PathBuf> {
    candidates
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            let tried: Vec<String> = candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect();
            anyhow!("no model file found (tried: {})", tried.join(", "))
        })
}

pub struct NeuralDetector {
    backend: Box<dyn InferenceBackend>,
    settings: NeuralSettings,
}

impl NeuralDetector {
    pub fn new(backend: Box<dyn InferenceBackend>, settings: NeuralSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Detections that survive NMS and the box-likeness filter.
    pub fn run(&mut self, frame: &Frame) -> Result<Vec<Candidate>> {
        let size = self.backend.input_size();
        let lb = Letterbox::new(frame.width(), frame.height(), size);
        let canvas = lb.apply(frame.image(), self.settings.pad_value);
        let input = to_nchw(&canvas);
        let output = self
            .backend
            .forward(&input)
            .with_context(|| format!("{} forward pass failed", self.backend.name()))?;

        let attributes = self
            .settings
            .expected_attributes
            .or_else(|| self.backend.output_attributes());
        let decoded = decode(&output, self.settings.confidence_threshold, attributes)?;
        // disallowed classes must not suppress allowed ones
        let mapped: Vec<ScoredBox> = decoded
            .into_iter()
            .filter(|b| self.class_allowed(b.class_id))
            .map(|b| ScoredBox {
                rect: lb.inverse_box(b.rect.x, b.rect.y, b.rect.x2(), b.rect.y2()),
                ..b
            })
            .collect();
        let kept = non_max_suppression(mapped, self.settings.iou_threshold);

        Ok(kept
            .into_iter()
            .filter(|b| self.box_like(&b.rect, frame.area()))
            .map(|b| Candidate {
                region: Region::Axis(b.rect),
                area: b.rect.area() as f64,
                aspect: (b.rect.w / b.rect.h) as f64,
                rectangularity: 1.0,
                score: Some(b.score),
                class_id: Some(b.class_id),
            })
            .collect())
    }

    fn class_allowed(&self, class_id: usize) -> bool {
        self.settings
            .allowed_classes
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&class_id))
    }

    fn box_like(&self, rect: &AxisRect, frame_area: f64) -> bool {
        if rect.w <= 0.0 || rect.h <= 0.0 || frame_area <= 0.0 {
            return false;
        }
        let rel_area = rect.area() as f64 / frame_area;
        let aspect = rect.w / rect.h;
        rel_area >= self.settings.min_relative_area as f64
            && aspect >= self.settings.min_aspect
            && aspect <= self.settings.max_aspect
    }
}

impl BoxDetector for NeuralDetector {
    fn name(&self) -> &'static str {
        "neural"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let started = Instant::now();
        let candidates = self.run(frame)?;
        Ok(DetectionResult::new(candidates, frame.seq, started.elapsed()))
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.backend.input_size() as usize;
        let input = ndarray::Array4::<f32>::zeros((1, 3, size, size));
        self.backend.forward(&input).map(|_| ())
    }
}
