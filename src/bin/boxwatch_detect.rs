//! boxwatch_detect - run one detection pipeline over a still image

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use boxwatch::detect::detect_isolated;
use boxwatch::runtime::build_detector;
use boxwatch::{DetectorMode, Frame, OverlayRenderer, Region, ServiceConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyse.
    input: PathBuf,
    /// Where to write the annotated image (format from the extension).
    #[arg(long, short, default_value = "annotated.jpg")]
    output: PathBuf,
    /// Detector: classical-edge, classical-adaptive or neural.
    #[arg(long)]
    detector: Option<DetectorMode>,
    /// TOML config file; BOXWATCH_* variables still apply on top.
    #[arg(long, env = "BOXWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Candidate model paths for the neural detector, first existing wins.
    #[arg(long = "model", value_name = "PATH")]
    models: Vec<PathBuf>,
    /// Print the detections as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Summary {
    input: PathBuf,
    detector: &'static str,
    model_path: Option<PathBuf>,
    count: usize,
    elapsed_ms: f64,
    boxes: Vec<BoxSummary>,
}

#[derive(Serialize)]
struct BoxSummary {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    rotated: bool,
    rectangularity: f64,
    score: Option<f32>,
    class_id: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut cfg = ServiceConfig::load_from(args.config.as_deref())?;
    if let Some(mode) = args.detector {
        cfg.pipeline.mode = mode;
    }
    if !args.models.is_empty() {
        cfg.pipeline.neural.model_paths = args.models.clone();
    }
    cfg.validate()?;

    let image = image::open(&args.input)
        .with_context(|| format!("failed to decode {}", args.input.display()))?
        .to_rgb8();
    let frame = Frame::new(image, 1);

    let (mut detector, model_path) = build_detector(&cfg.pipeline)?;
    detector.warm_up()?;
    let result = detect_isolated(detector.as_mut(), &frame).map_err(|e| anyhow!(e))?;

    let overlay = OverlayRenderer::from_config(&cfg);
    let mut annotated = frame.working_copy();
    overlay.draw_candidates(&mut annotated, &result.candidates);
    annotated
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    let summary = Summary {
        input: args.input.clone(),
        detector: detector.name(),
        model_path,
        count: result.count(),
        elapsed_ms: result.elapsed.as_secs_f64() * 1000.0,
        boxes: result
            .candidates
            .iter()
            .map(|c| {
                let b = c.region.bounds();
                BoxSummary {
                    x: b.x,
                    y: b.y,
                    w: b.w,
                    h: b.h,
                    rotated: matches!(c.region, Region::Rotated(_)),
                    rectangularity: c.rectangularity,
                    score: c.score,
                    class_id: c.class_id,
                }
            })
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{}: {} box(es) via {} in {:.1} ms",
            summary.input.display(),
            summary.count,
            summary.detector,
            summary.elapsed_ms
        );
        for (i, b) in summary.boxes.iter().enumerate() {
            match b.score {
                Some(score) => println!(
                    "  #{} x={:.0} y={:.0} w={:.0} h={:.0} score={:.2}",
                    i, b.x, b.y, b.w, b.h, score
                ),
                None => println!(
                    "  #{} x={:.0} y={:.0} w={:.0} h={:.0} rect={:.2}",
                    i, b.x, b.y, b.w, b.h, b.rectangularity
                ),
            }
        }
        println!("annotated image written to {}", args.output.display());
    }
    Ok(())
}
