//! Foreground capture/render loop state.
//!
//! `Runtime` owns the frame source, the analyzer, the presence stabilizer and
//! the overlay. `step()` runs one capture cycle and returns either a report or
//! the kind of per-frame failure; callers match on it and keep going.
//!
//! The classical pipeline runs inline. The neural pipeline runs behind an
//! [`InferenceDecoupler`] and the loop always draws the most recent completed
//! result, which may belong to an older capture.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use log::{debug, info, warn};

use crate::config::{DetectorMode, PipelineConfig, ServiceConfig};
use crate::decoupler::{InferenceDecoupler, Offer};
use crate::detect::{
    detect_isolated, open_backend, BoxDetector, ClassicalDetector, ClassicalSettings,
    DetectionResult, NeuralDetector,
};
use crate::error::{FrameError, WarnThrottle};
use crate::frame::{encode_jpeg, Frame};
use crate::ingest::{open_source, FrameSource};
use crate::overlay::{FpsMeter, HudStatus, OverlayRenderer};
use crate::presence::{Presence, PresenceStabilizer, PresenceUpdate};
use crate::stream::{FrameHub, PublishedFrame};

/// Where detection results come from.
pub enum Analyzer {
    /// Runs on the capture thread for every frame.
    Inline(Box<dyn BoxDetector>),
    /// Runs on a worker; the loop reads the latest completed result.
    Decoupled(InferenceDecoupler),
}

impl Analyzer {
    pub fn name(&self) -> &'static str {
        match self {
            Analyzer::Inline(detector) => detector.name(),
            Analyzer::Decoupled(_) => "neural",
        }
    }

    fn analyze(&mut self, frame: &Frame) -> std::result::Result<Arc<DetectionResult>, FrameError> {
        match self {
            Analyzer::Inline(detector) => detect_isolated(detector.as_mut(), frame).map(Arc::new),
            Analyzer::Decoupled(decoupler) => {
                if let Offer::Dropped = decoupler.offer(frame) {
                    debug!("frame {} dropped: inference busy", frame.seq);
                }
                Ok(decoupler.latest())
            }
        }
    }
}

/// Outcome of one successful cycle.
#[derive(Debug)]
pub struct FrameReport {
    pub seq: u64,
    pub raw: Arc<RgbImage>,
    pub annotated: Arc<RgbImage>,
    pub jpeg: Arc<Vec<u8>>,
    /// Raw box count fed to the stabilizer.
    pub count: usize,
    pub presence: PresenceUpdate,
    pub fps: f32,
}

/// Snapshot of loop health for periodic logging.
#[derive(Clone, Debug)]
pub struct RuntimeHealth {
    pub source_healthy: bool,
    pub frames_captured: u64,
    pub source: String,
    pub inference_generation: Option<u64>,
    pub presence: Presence,
}

pub struct Runtime {
    source: Box<dyn FrameSource>,
    analyzer: Analyzer,
    stabilizer: PresenceStabilizer,
    overlay: OverlayRenderer,
    fps: FpsMeter,
    jpeg_quality: u8,
    pipeline: Arc<PipelineConfig>,
    model_path: Option<PathBuf>,
    hub: Option<Arc<FrameHub>>,
    capture_warn: WarnThrottle,
    detect_warn: WarnThrottle,
    encode_warn: WarnThrottle,
}

impl Runtime {
    /// Assemble a runtime from already-built parts. The source must be connected.
    pub fn new(
        source: Box<dyn FrameSource>,
        analyzer: Analyzer,
        pipeline: Arc<PipelineConfig>,
        overlay: OverlayRenderer,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            source,
            analyzer,
            stabilizer: PresenceStabilizer::new(pipeline.presence.clone()),
            overlay,
            fps: FpsMeter::new(),
            jpeg_quality,
            pipeline,
            model_path: None,
            hub: None,
            capture_warn: WarnThrottle::default(),
            detect_warn: WarnThrottle::default(),
            encode_warn: WarnThrottle::default(),
        }
    }

    /// Open the configured source and detector. Fails when the source cannot
    /// connect or, in neural mode, when no model is found.
    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let pipeline = Arc::new(cfg.pipeline.clone());

        let mut source = open_source(&cfg.source)?;
        source
            .connect()
            .with_context(|| format!("failed to connect source {}", cfg.source.url))?;
        info!("source connected: {}", source.stats().source);

        let (analyzer, model_path) = build_analyzer(&pipeline)?;
        info!("detector: {}", analyzer.name());

        let mut runtime = Self::new(
            source,
            analyzer,
            pipeline,
            OverlayRenderer::from_config(cfg),
            cfg.jpeg_quality,
        );
        runtime.model_path = model_path;
        Ok(runtime)
    }

    /// Publish every rendered frame into `hub`.
    pub fn with_hub(mut self, hub: Arc<FrameHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn detector_name(&self) -> &'static str {
        self.analyzer.name()
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn presence(&self) -> Presence {
        self.stabilizer.state()
    }

    /// Run one capture cycle.
    ///
    /// A capture failure leaves the stabilizer untouched. A failed detection
    /// pass counts as zero boxes; the plain frame is still published and the
    /// error is returned. An encode failure skips emission of the frame.
    pub fn step(&mut self) -> std::result::Result<FrameReport, FrameError> {
        let frame = match self.source.capture() {
            Ok(frame) => {
                self.capture_warn.reset();
                frame
            }
            Err(err) => {
                let err = FrameError::Capture(format!("{:#}", err));
                if self.capture_warn.hit() {
                    warn!("{} ({} in a row)", err, self.capture_warn.streak());
                }
                return Err(err);
            }
        };

        let (result, detect_error) = match self.analyzer.analyze(&frame) {
            Ok(result) => {
                self.detect_warn.reset();
                (result, None)
            }
            Err(err) => {
                if self.detect_warn.hit() {
                    warn!(
                        "frame {}: {} ({} in a row)",
                        frame.seq,
                        err,
                        self.detect_warn.streak()
                    );
                }
                (Arc::new(DetectionResult::empty(frame.seq)), Some(err))
            }
        };

        let count = result.count();
        let update = self.stabilizer.update(count);
        if let Some((from, to)) = update.transition {
            info!(
                "presence {} -> {} at frame {} (boxes={})",
                from.as_str(),
                to.as_str(),
                frame.seq,
                count
            );
        }
        debug!(
            "frame={} boxes={} presence={} warmup={}",
            frame.seq,
            count,
            update.state.as_str(),
            update.in_warmup
        );

        let fps = self.fps.tick(Instant::now());
        let mut annotated = frame.working_copy();
        self.overlay.draw_candidates(&mut annotated, &result.candidates);
        self.overlay.draw_hud(
            &mut annotated,
            &HudStatus {
                fps,
                count,
                presence: update.state,
            },
        );

        let jpeg = match encode_jpeg(&annotated, self.jpeg_quality) {
            Ok(jpeg) => {
                self.encode_warn.reset();
                Arc::new(jpeg)
            }
            Err(err) => {
                let err = FrameError::Encode(format!("{:#}", err));
                if self.encode_warn.hit() {
                    warn!(
                        "frame {}: {} ({} in a row)",
                        frame.seq,
                        err,
                        self.encode_warn.streak()
                    );
                }
                return Err(err);
            }
        };

        let report = FrameReport {
            seq: frame.seq,
            raw: frame.shared_image(),
            annotated: Arc::new(annotated),
            jpeg,
            count,
            presence: update,
            fps,
        };
        if let Some(hub) = &self.hub {
            hub.publish(PublishedFrame {
                seq: report.seq,
                raw: Arc::clone(&report.raw),
                annotated: Arc::clone(&report.annotated),
                annotated_jpeg: Arc::clone(&report.jpeg),
                count,
                presence: update.state,
            });
        }

        match detect_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        let stats = self.source.stats();
        RuntimeHealth {
            source_healthy: self.source.is_healthy(),
            frames_captured: stats.frames_captured,
            source: stats.source,
            inference_generation: match &self.analyzer {
                Analyzer::Inline(_) => None,
                Analyzer::Decoupled(decoupler) => Some(decoupler.generation()),
            },
            presence: self.stabilizer.state(),
        }
    }

    /// Stop the inference worker, letting a pass in flight finish.
    pub fn shutdown(&mut self) {
        if let Analyzer::Decoupled(decoupler) = &mut self.analyzer {
            decoupler.stop();
        }
    }
}

/// Build the detector for `pipeline.mode`, returning the model path in neural mode.
pub fn build_detector(pipeline: &PipelineConfig) -> Result<(Box<dyn BoxDetector>, Option<PathBuf>)> {
    match pipeline.mode {
        DetectorMode::ClassicalEdge | DetectorMode::ClassicalAdaptive => {
            let settings = ClassicalSettings::from_config(pipeline)
                .ok_or_else(|| anyhow!("{} is not a classical mode", pipeline.mode.as_str()))?;
            Ok((Box::new(ClassicalDetector::new(settings)), None))
        }
        DetectorMode::Neural => {
            let (backend, path) = open_backend(&pipeline.neural)?;
            info!("model loaded from {} ({})", path.display(), backend.name());
            let detector = NeuralDetector::new(backend, pipeline.neural.clone());
            Ok((Box::new(detector), Some(path)))
        }
    }
}

/// Classical detectors run inline; the neural one goes behind the decoupler.
pub fn build_analyzer(pipeline: &PipelineConfig) -> Result<(Analyzer, Option<PathBuf>)> {
    let (detector, model_path) = build_detector(pipeline)?;
    let analyzer = match pipeline.mode {
        DetectorMode::Neural => {
            Analyzer::Decoupled(InferenceDecoupler::spawn(detector, pipeline.neural.frame_skip)?)
        }
        DetectorMode::ClassicalEdge | DetectorMode::ClassicalAdaptive => Analyzer::Inline(detector),
    };
    Ok((analyzer, model_path))
}
