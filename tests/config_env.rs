use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use boxwatch::config::ServiceConfig;
use boxwatch::DetectorMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BOXWATCH_CONFIG",
        "BOXWATCH_ADDR",
        "BOXWATCH_SOURCE",
        "BOXWATCH_WIDTH",
        "BOXWATCH_HEIGHT",
        "BOXWATCH_DETECTOR",
        "BOXWATCH_MODEL_PATHS",
        "BOXWATCH_JPEG_QUALITY",
        "BOXWATCH_FRAME_SKIP",
        "BOXWATCH_WARMUP_FRAMES",
        "BOXWATCH_SAMPLES_DIR",
        "BOXWATCH_FONT",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
addr = "127.0.0.1:9100"
jpeg_quality = 70
detector = "classical-adaptive"

[source]
url = "stub://dock"
width = 800
height = 600

[geometry]
min_area_fraction = 0.01

[presence]
hit_threshold = 4
miss_threshold = 8
warmup_frames = 20
"#,
    );

    std::env::set_var("BOXWATCH_CONFIG", file.path());
    std::env::set_var("BOXWATCH_WIDTH", "1280");
    std::env::set_var("BOXWATCH_WARMUP_FRAMES", "3");
    std::env::set_var("BOXWATCH_MODEL_PATHS", "a.onnx, ,b.onnx");

    let cfg = ServiceConfig::load().expect("load config");

    assert_eq!(cfg.addr, "127.0.0.1:9100");
    assert_eq!(cfg.jpeg_quality, 70);
    assert_eq!(cfg.pipeline.mode, DetectorMode::ClassicalAdaptive);
    assert_eq!(cfg.source.url, "stub://dock");
    assert_eq!(cfg.source.width, 1280);
    assert_eq!(cfg.source.height, 600);
    assert_eq!(cfg.pipeline.geometry.min_area_fraction, 0.01);
    assert_eq!(cfg.pipeline.geometry.max_area_fraction, 0.80);
    assert_eq!(cfg.pipeline.presence.hit_threshold, 4);
    assert_eq!(cfg.pipeline.presence.miss_threshold, 8);
    assert_eq!(cfg.pipeline.presence.warmup_frames, 3);
    assert_eq!(
        cfg.pipeline.neural.model_paths,
        vec![PathBuf::from("a.onnx"), PathBuf::from("b.onnx")]
    );

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load defaults");
    assert_eq!(cfg, ServiceConfig::default());
    assert_eq!(cfg.addr, "0.0.0.0:8000");
    assert_eq!(cfg.samples_dir, PathBuf::from("samples"));
    assert_eq!(cfg.pipeline.mode, DetectorMode::ClassicalEdge);

    clear_env();
}

#[test]
fn detector_env_accepts_short_names() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BOXWATCH_DETECTOR", "yolo");
    std::env::set_var("BOXWATCH_FRAME_SKIP", "0");
    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.pipeline.mode, DetectorMode::Neural);
    assert_eq!(cfg.pipeline.neural.frame_skip, 0);

    clear_env();
}

#[test]
fn invalid_values_are_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BOXWATCH_JPEG_QUALITY", "0");
    assert!(ServiceConfig::load().is_err());
    clear_env();

    std::env::set_var("BOXWATCH_WIDTH", "wide");
    assert!(ServiceConfig::load().is_err());
    clear_env();

    std::env::set_var("BOXWATCH_DETECTOR", "hough");
    assert!(ServiceConfig::load().is_err());
    clear_env();

    let file = write_config(
        r#"
[geometry]
min_aspect = 4.0
max_aspect = 2.0
"#,
    );
    std::env::set_var("BOXWATCH_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());
    clear_env();

    let file = write_config("unknown_key = 1\n");
    std::env::set_var("BOXWATCH_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());
    clear_env();
}

#[test]
fn zero_polygon_epsilon_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for section in ["edge", "adaptive"] {
        let file = write_config(&format!("[{}]\nepsilon_fraction = 0.0\n", section));
        std::env::set_var("BOXWATCH_CONFIG", file.path());
        let err = ServiceConfig::load().expect_err("zero epsilon accepted");
        assert!(
            format!("{:#}", err).contains("epsilon_fraction"),
            "unexpected error: {:#}",
            err
        );
        clear_env();
    }

    let mut pipeline = boxwatch::PipelineConfig::default();
    pipeline.edge.epsilon_fraction = 0.0;
    assert!(pipeline.validate().is_err());
    pipeline.edge.epsilon_fraction = 0.01;
    assert!(pipeline.validate().is_ok());
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BOXWATCH_CONFIG", "/nonexistent/boxwatch.toml");
    assert!(ServiceConfig::load().is_err());

    clear_env();
}
