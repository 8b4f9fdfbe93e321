use anyhow::{anyhow, Result};
use ndarray::{Array2, Array4, ArrayD};

use crate::detect::backend::InferenceBackend;
use crate::detect::neural::BOX_ATTRIBUTES;

/// Stub backend for testing and model-less demos.
///
/// Returns the same canned `[1, attributes, detections]` tensor for every
/// input, so decode, NMS and the box filters run without a real model.
pub struct StubBackend {
    input_size: u32,
    attributes: usize,
    output: ArrayD<f32>,
}

impl StubBackend {
    /// A backend that never detects anything (one class, zero rows).
    pub fn new(input_size: u32) -> Self {
        let attributes = BOX_ATTRIBUTES + 1;
        Self {
            input_size,
            attributes,
            output: ArrayD::zeros(vec![1, attributes, 0]),
        }
    }

    /// Canned detections in canvas pixels, one row per detection laid out
    /// as `[cx, cy, w, h, obj, class...]`.
    ///
    /// Rows shorter than the first row are zero-padded.
    pub fn from_rows(input_size: u32, rows: &[Vec<f32>]) -> Self {
        let attributes = rows
            .first()
            .map(|r| r.len())
            .unwrap_or(BOX_ATTRIBUTES + 1);
        let table = Array2::from_shape_fn((attributes, rows.len()), |(a, d)| {
            rows[d].get(a).copied().unwrap_or(0.0)
        });
        let output = table.insert_axis(ndarray::Axis(0)).into_dyn();
        Self {
            input_size,
            attributes,
            output,
        }
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn output_attributes(&self) -> Option<usize> {
        Some(self.attributes)
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let side = self.input_size as usize;
        if input.shape() != &[1, 3, side, side][..] {
            return Err(anyhow!(
                "stub backend expects [1, 3, {}, {}], got {:?}",
                side,
                side,
                input.shape()
            ));
        }
        Ok(self.output.clone())
    }
}
