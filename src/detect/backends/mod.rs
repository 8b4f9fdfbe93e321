pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::NeuralSettings;
use crate::detect::backend::InferenceBackend;
use crate::detect::neural::discover_model;

/// Model paths with this prefix select the canned stub backend.
pub const STUB_MODEL_PREFIX: &str = "stub://";

/// Resolve the configured model candidates and open a backend for the winner.
pub fn open_backend(settings: &NeuralSettings) -> Result<(Box<dyn InferenceBackend>, PathBuf)> {
    if let Some(stub) = settings
        .model_paths
        .iter()
        .find(|p| p.to_string_lossy().starts_with(STUB_MODEL_PREFIX))
    {
        return Ok((Box::new(StubBackend::new(settings.input_size)), stub.clone()));
    }
    let path = discover_model(&settings.model_paths)?;
    let backend = load_model(&path, settings.input_size)?;
    Ok((backend, path))
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &Path, input_size: u32) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(TractBackend::new(path, input_size)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &Path, _input_size: u32) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow::anyhow!(
        "found model {} but this build has no ONNX runtime (enable feature `backend-tract`)",
        path.display()
    ))
}
