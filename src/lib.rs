//! boxwatch
//!
//! Watches a camera feed for box-shaped objects and reports a debounced
//! "box present" signal alongside an annotated MJPEG stream.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> detector -> PresenceStabilizer -> OverlayRenderer -> FrameHub -> HTTP clients
//! ```
//!
//! Two detector families are available:
//!
//! 1. **Classical**: edge or adaptive-threshold masks, contour tracing and a
//!    geometry filter. Cheap enough to run inline on every frame.
//! 2. **Neural**: a single-stage object detector behind an [`InferenceBackend`],
//!    run on a worker thread through the [`InferenceDecoupler`] so slow
//!    inference never stalls capture.
//!
//! # Module Structure
//!
//! - `config`: service and pipeline settings (TOML file + env overrides)
//! - `ingest`: frame sources (synthetic, still image, V4L2)
//! - `detect`: classical and neural detectors, inference backends
//! - `geometry`: polygon measures and the box-likeness filter
//! - `presence`: hit/miss hysteresis over per-frame counts
//! - `runtime`: the per-frame capture/render cycle
//! - `stream`, `snapshot`: HTTP/MJPEG output and on-demand JPEG pairs

pub mod config;
pub mod decoupler;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod overlay;
pub mod presence;
pub mod runtime;
pub mod snapshot;
pub mod stream;

pub use config::{DetectorMode, PipelineConfig, ServiceConfig};
pub use decoupler::{InferenceDecoupler, LatestResult, Offer};
pub use detect::{
    BoxDetector, ClassicalDetector, ClassicalSettings, DetectionResult, InferenceBackend,
    NeuralDetector,
};
pub use error::FrameError;
pub use frame::Frame;
pub use geometry::{AxisRect, Candidate, Region, RotatedRect};
pub use ingest::{open_source, FrameSource, SourceStats, StillImageSource, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{v4l2::V4l2Config, V4l2Source};
pub use overlay::{FpsMeter, OverlayRenderer};
pub use presence::{Presence, PresenceStabilizer, PresenceUpdate};
pub use runtime::{Analyzer, FrameReport, Runtime};
pub use snapshot::{SnapshotRecord, SnapshotSink};
pub use stream::{FrameHub, StreamConfig, StreamHandle, StreamServer};
