use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use boxwatch::config::{PipelineConfig, PresenceSettings, ServiceConfig, SourceSettings};
use boxwatch::ingest::SourceStats;
use boxwatch::{
    Analyzer, ClassicalDetector, ClassicalSettings, DetectorMode, Frame, FrameError, FrameHub,
    FrameSource, OverlayRenderer, Presence, Runtime, SyntheticSource,
};

fn synthetic(width: u32, height: u32) -> SourceSettings {
    SourceSettings {
        url: "stub://bench".to_string(),
        width,
        height,
        target_fps: 0,
    }
}

fn pipeline(warmup: u64) -> Arc<PipelineConfig> {
    Arc::new(PipelineConfig {
        presence: PresenceSettings {
            hit_threshold: 3,
            miss_threshold: 6,
            warmup_frames: warmup,
        },
        ..PipelineConfig::default()
    })
}

struct Broken;

impl FrameSource for Broken {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        Err(anyhow!("device unplugged"))
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: 0,
            source: "broken".to_string(),
        }
    }
}

#[test]
fn synthetic_scene_drives_presence_both_ways() {
    let pipeline = pipeline(2);
    let mut source = SyntheticSource::new(synthetic(320, 240));
    source.connect().expect("connect");
    let detector = ClassicalDetector::new(ClassicalSettings::edge_based(&pipeline));
    let mut runtime = Runtime::new(
        Box::new(source),
        Analyzer::Inline(Box::new(detector)),
        Arc::clone(&pipeline),
        OverlayRenderer::plain(),
        75,
    );

    let mut first_present = None;
    let mut first_absent_after = None;
    for n in 1..=100u64 {
        let report = runtime.step().expect("synthetic frames never fail");
        assert_eq!(report.seq, n);
        if n <= 2 {
            assert_eq!(report.presence.state, Presence::Absent);
        }
        if report.presence.state == Presence::Present && first_present.is_none() {
            first_present = Some(n);
        }
        if first_present.is_some()
            && report.presence.state == Presence::Absent
            && first_absent_after.is_none()
        {
            first_absent_after = Some(n);
        }
    }

    // box visible on frames 1..=70, gone from 71
    let present_at = first_present.expect("box never reported present");
    assert!(present_at >= 5 && present_at <= 10, "present at {}", present_at);
    let absent_at = first_absent_after.expect("box never reported gone");
    assert!(absent_at >= 76 && absent_at <= 80, "absent at {}", absent_at);
}

#[test]
fn capture_errors_are_contained() {
    let mut runtime = Runtime::new(
        Box::new(Broken),
        Analyzer::Inline(Box::new(ClassicalDetector::new(ClassicalSettings::edge_based(
            &PipelineConfig::default(),
        )))),
        pipeline(0),
        OverlayRenderer::plain(),
        80,
    );
    for _ in 0..5 {
        assert!(matches!(runtime.step(), Err(FrameError::Capture(_))));
    }
    let health = runtime.health();
    assert!(!health.source_healthy);
    assert_eq!(health.presence, Presence::Absent);
}

#[test]
fn published_frames_reach_the_hub() {
    let pipeline = pipeline(0);
    let mut source = SyntheticSource::new(synthetic(160, 120));
    source.connect().expect("connect");
    let hub = Arc::new(FrameHub::new());
    let mut runtime = Runtime::new(
        Box::new(source),
        Analyzer::Inline(Box::new(ClassicalDetector::new(ClassicalSettings::adaptive(
            &pipeline,
        )))),
        pipeline,
        OverlayRenderer::plain(),
        80,
    )
    .with_hub(Arc::clone(&hub));

    let report = runtime.step().expect("step");
    let published = hub.latest().expect("frame published");
    assert_eq!(published.seq, report.seq);
    assert_eq!(published.count, report.count);
    assert_eq!(&published.annotated_jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(published.raw.dimensions(), (160, 120));
}

#[test]
fn neural_mode_runs_behind_the_decoupler() {
    let mut cfg = ServiceConfig::default();
    cfg.source = synthetic(160, 120);
    cfg.pipeline.mode = DetectorMode::Neural;
    cfg.pipeline.neural.model_paths = vec![PathBuf::from("stub://empty")];
    cfg.pipeline.neural.input_size = 64;
    cfg.pipeline.neural.frame_skip = 0;

    let mut runtime = Runtime::from_config(&cfg).expect("runtime");
    assert_eq!(runtime.model_path(), Some(Path::new("stub://empty")));
    assert_eq!(runtime.detector_name(), "neural");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let report = runtime.step().expect("step");
        assert_eq!(report.count, 0);
        if runtime.health().inference_generation.unwrap_or(0) > 0 || Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(runtime.health().inference_generation.unwrap_or(0) > 0);
    runtime.shutdown();
}

#[test]
fn missing_model_is_fatal_at_start() {
    let mut cfg = ServiceConfig::default();
    cfg.source = synthetic(160, 120);
    cfg.pipeline.mode = DetectorMode::Neural;
    cfg.pipeline.neural.model_paths = vec![PathBuf::from("/nonexistent/boxes.onnx")];
    assert!(Runtime::from_config(&cfg).is_err());
}
