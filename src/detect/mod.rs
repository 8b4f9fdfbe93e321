mod backend;
pub mod backends;
pub mod classical;
pub mod neural;
pub mod preprocess;
mod result;

pub use backend::{detect_isolated, BoxDetector, InferenceBackend};
pub use backends::{open_backend, StubBackend};
pub use classical::{ClassicalDetector, ClassicalSettings, Preprocess};
pub use neural::NeuralDetector;
pub use result::DetectionResult;
