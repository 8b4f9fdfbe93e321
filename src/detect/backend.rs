use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;
use ndarray::{Array4, ArrayD};

use crate::detect::result::DetectionResult;
use crate::error::FrameError;
use crate::frame::Frame;

/// A per-frame box detector.
///
/// Implementations read the frame and never write into it. Both the
/// classical and neural pipelines implement this, so the runtime and the
/// decoupler can drive either one.
pub trait BoxDetector: Send {
    /// Detector identifier, used in logs and `/config`.
    fn name(&self) -> &'static str;

    /// Run one detection pass.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Forward-pass engine behind the neural pipeline.
///
/// Takes a `1x3xSxS` normalized tensor and returns the raw model output,
/// either `[1, attrs, dets]` or `[1, dets, attrs]`.
pub trait InferenceBackend: Send {
    fn name(&self) -> &'static str;

    /// Square input side the model expects.
    fn input_size(&self) -> u32;

    /// Attributes per detection, when the backend knows it.
    fn output_attributes(&self) -> Option<usize> {
        None
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>>;
}

/// Run a detection pass so that an error or a panic only affects this frame.
pub fn detect_isolated(
    detector: &mut dyn BoxDetector,
    frame: &Frame,
) -> std::result::Result<DetectionResult, FrameError> {
    match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(FrameError::Detection(format!("{:#}", err))),
        Err(payload) => Err(FrameError::Detection(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {}", msg)
    } else {
        "panic with non-string payload".to_string()
    }
}
