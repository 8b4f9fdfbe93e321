#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array4, ArrayD, IxDyn};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;

/// Tract-based backend for ONNX inference.
///
/// Loads a local YOLO-style model with a fixed `1x3xSxS` input and returns
/// its first output unchanged.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let data = input
            .as_slice()
            .ok_or_else(|| anyhow!("input tensor is not contiguous"))?;
        let tensor = Tensor::from_shape::<f32>(input.shape(), data)
            .context("failed to build input tensor")?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();
        ArrayD::from_shape_vec(IxDyn(&shape), values).context("failed to reshape model output")
    }
}
