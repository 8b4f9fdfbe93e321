//! boxwatchd - box presence daemon
//!
//! This daemon:
//! 1. Loads configuration (BOXWATCH_CONFIG file + BOXWATCH_* overrides)
//! 2. Opens the frame source and the configured detector
//! 3. Serves the annotated MJPEG stream, snapshots and status over HTTP
//! 4. Runs the capture/render loop until Ctrl-C

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use boxwatch::{FrameError, FrameHub, Runtime, ServiceConfig, SnapshotSink, StreamConfig, StreamServer};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ServiceConfig::load()?;
    log::info!(
        "boxwatchd {} starting: source={} {}x{} detector={} jpeg_quality={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.source.width,
        cfg.source.height,
        cfg.pipeline.mode.as_str(),
        cfg.jpeg_quality
    );
    log::info!(
        "presence: hit={} miss={} warmup_frames={}",
        cfg.pipeline.presence.hit_threshold,
        cfg.pipeline.presence.miss_threshold,
        cfg.pipeline.presence.warmup_frames
    );

    let hub = Arc::new(FrameHub::new());
    let mut runtime = Runtime::from_config(&cfg)?.with_hub(Arc::clone(&hub));

    let stream_cfg = StreamConfig::for_service(&cfg, runtime.detector_name(), runtime.model_path())?;
    let snapshots = SnapshotSink::new(cfg.samples_dir.clone(), cfg.jpeg_quality);
    let stream = StreamServer::new(stream_cfg, Arc::clone(&hub), snapshots).spawn()?;
    log::info!("stream listening on http://{}/", stream.addr);

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut last_health_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        match runtime.step() {
            Ok(_) => {}
            Err(FrameError::Capture(_)) => std::thread::sleep(CAPTURE_RETRY_DELAY),
            Err(FrameError::Detection(_)) | Err(FrameError::Encode(_)) => {}
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let health = runtime.health();
            log::debug!(
                "source health={} frames={} source={} inference_generation={:?} presence={}",
                health.source_healthy,
                health.frames_captured,
                health.source,
                health.inference_generation,
                health.presence.as_str()
            );
            last_health_log = Instant::now();
        }
    }

    log::info!("shutdown signal received, stopping...");
    runtime.shutdown();
    stream.stop()?;
    log::info!("boxwatchd stopped");
    Ok(())
}
