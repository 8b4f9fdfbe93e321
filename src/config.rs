use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_SOURCE: &str = "stub://front_camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 15;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_SAMPLES_DIR: &str = "samples";
const DEFAULT_MODEL_PATHS: [&str; 2] = ["models/yolov8n_boxes.onnx", "models/yolov8n.onnx"];

/// Which detection pipeline the runtime drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorMode {
    ClassicalEdge,
    ClassicalAdaptive,
    Neural,
}

impl DetectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorMode::ClassicalEdge => "classical-edge",
            DetectorMode::ClassicalAdaptive => "classical-adaptive",
            DetectorMode::Neural => "neural",
        }
    }
}

impl FromStr for DetectorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classical-edge" | "edge" => Ok(DetectorMode::ClassicalEdge),
            "classical-adaptive" | "adaptive" => Ok(DetectorMode::ClassicalAdaptive),
            "neural" | "yolo" => Ok(DetectorMode::Neural),
            other => Err(anyhow!(
                "unknown detector mode {:?} (expected classical-edge, classical-adaptive or neural)",
                other
            )),
        }
    }
}

/// Geometry Filter thresholds shared by both classical policies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeometryThresholds {
    pub min_area_fraction: f64,
    pub max_area_fraction: f64,
    /// Long side over short side, so never below 1.
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub min_rectangularity: f64,
    pub min_rotated_rectangularity: f64,
}

impl Default for GeometryThresholds {
    fn default() -> Self {
        Self {
            min_area_fraction: 0.002,
            max_area_fraction: 0.80,
            min_aspect: 1.0,
            max_aspect: 3.5,
            min_rectangularity: 0.60,
            min_rotated_rectangularity: 0.50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeSettings {
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub dilate_radius: u8,
    pub epsilon_fraction: f64,
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            canny_low: 50.0,
            canny_high: 150.0,
            dilate_radius: 1,
            epsilon_fraction: 0.02,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptiveSettings {
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    pub block_radius: u32,
    pub offset: i32,
    pub median_radius: u32,
    pub close_radius: u8,
    pub pad_margin: u32,
    pub epsilon_fraction: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            block_radius: 12,
            offset: 7,
            median_radius: 2,
            close_radius: 2,
            pad_margin: 10,
            epsilon_fraction: 0.02,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeuralSettings {
    /// Candidate model files, first existing wins.
    pub model_paths: Vec<PathBuf>,
    pub input_size: u32,
    pub pad_value: u8,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// `None` accepts every class.
    pub allowed_classes: Option<Vec<usize>>,
    pub min_relative_area: f32,
    /// Width over height window for the box-likeness filter.
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub frame_skip: u32,
    /// Attributes per detection (4 + 1 + classes) when known; used to pick
    /// the output orientation before falling back to the smaller axis.
    pub expected_attributes: Option<usize>,
    pub draw_scores: bool,
}

impl Default for NeuralSettings {
    fn default() -> Self {
        Self {
            model_paths: DEFAULT_MODEL_PATHS.iter().map(PathBuf::from).collect(),
            input_size: 640,
            pad_value: 114,
            confidence_threshold: 0.35,
            iou_threshold: 0.45,
            allowed_classes: None,
            min_relative_area: 0.02,
            min_aspect: 0.5,
            max_aspect: 2.0,
            frame_skip: 2,
            expected_attributes: None,
            draw_scores: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresenceSettings {
    pub hit_threshold: u32,
    pub miss_threshold: u32,
    pub warmup_frames: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            hit_threshold: 3,
            miss_threshold: 6,
            warmup_frames: 10,
        }
    }
}

/// Immutable detection configuration, validated once and shared as `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub mode: DetectorMode,
    pub geometry: GeometryThresholds,
    pub edge: EdgeSettings,
    pub adaptive: AdaptiveSettings,
    pub neural: NeuralSettings,
    pub presence: PresenceSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: DetectorMode::ClassicalEdge,
            geometry: GeometryThresholds::default(),
            edge: EdgeSettings::default(),
            adaptive: AdaptiveSettings::default(),
            neural: NeuralSettings::default(),
            presence: PresenceSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let g = &self.geometry;
        for (name, value) in [
            ("geometry.min_area_fraction", g.min_area_fraction),
            ("geometry.max_area_fraction", g.max_area_fraction),
            ("geometry.min_aspect", g.min_aspect),
            ("geometry.max_aspect", g.max_aspect),
            ("geometry.min_rectangularity", g.min_rectangularity),
            ("geometry.min_rotated_rectangularity", g.min_rotated_rectangularity),
        ] {
            require_non_negative(name, value)?;
        }
        for (name, value) in [
            ("edge.epsilon_fraction", self.edge.epsilon_fraction),
            ("adaptive.epsilon_fraction", self.adaptive.epsilon_fraction),
        ] {
            require_positive(name, value)?;
        }
        if !in_unit_interval(g.min_area_fraction) || !in_unit_interval(g.max_area_fraction) {
            return Err(anyhow!("geometry area fractions must lie in (0, 1]"));
        }
        if g.min_area_fraction >= g.max_area_fraction {
            return Err(anyhow!(
                "geometry.min_area_fraction ({}) must be below max_area_fraction ({})",
                g.min_area_fraction,
                g.max_area_fraction
            ));
        }
        if g.min_aspect <= 0.0 || g.min_aspect > g.max_aspect {
            return Err(anyhow!(
                "geometry aspect range {}..{} is invalid",
                g.min_aspect,
                g.max_aspect
            ));
        }
        if !in_unit_interval(g.min_rectangularity) || !in_unit_interval(g.min_rotated_rectangularity)
        {
            return Err(anyhow!("rectangularity floors must lie in (0, 1]"));
        }

        let e = &self.edge;
        require_non_negative("edge.blur_sigma", e.blur_sigma as f64)?;
        require_non_negative("edge.canny_low", e.canny_low as f64)?;
        require_non_negative("edge.canny_high", e.canny_high as f64)?;
        if e.canny_low > e.canny_high {
            return Err(anyhow!(
                "edge.canny_low ({}) must not exceed canny_high ({})",
                e.canny_low,
                e.canny_high
            ));
        }

        let a = &self.adaptive;
        require_non_negative("adaptive.clahe_clip_limit", a.clahe_clip_limit as f64)?;
        if a.clahe_tiles == 0 {
            return Err(anyhow!("adaptive.clahe_tiles must be greater than zero"));
        }
        if a.block_radius == 0 {
            return Err(anyhow!("adaptive.block_radius must be greater than zero"));
        }

        let n = &self.neural;
        for (name, value) in [
            ("neural.confidence_threshold", n.confidence_threshold),
            ("neural.iou_threshold", n.iou_threshold),
            ("neural.min_relative_area", n.min_relative_area),
        ] {
            require_non_negative(name, value as f64)?;
            if value > 1.0 {
                return Err(anyhow!("{} must lie in [0, 1]", name));
            }
        }
        require_non_negative("neural.min_aspect", n.min_aspect as f64)?;
        require_non_negative("neural.max_aspect", n.max_aspect as f64)?;
        if n.min_aspect > n.max_aspect {
            return Err(anyhow!(
                "neural aspect range {}..{} is invalid",
                n.min_aspect,
                n.max_aspect
            ));
        }
        if n.input_size == 0 {
            return Err(anyhow!("neural.input_size must be greater than zero"));
        }
        if self.mode == DetectorMode::Neural && n.model_paths.is_empty() {
            return Err(anyhow!("neural mode requires at least one model path"));
        }

        let p = &self.presence;
        if p.hit_threshold == 0 || p.miss_threshold == 0 {
            return Err(anyhow!("presence hit/miss thresholds must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    /// `stub://<name>`, `file://<path>`, or `v4l2://<device>`.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlaySettings {
    /// TrueType font for HUD and labels; text is skipped without one.
    pub font_path: Option<PathBuf>,
    pub hud: bool,
    pub version_label: String,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_path: None,
            hud: true,
            version_label: format!("boxwatch v{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    addr: Option<String>,
    jpeg_quality: Option<u8>,
    samples_dir: Option<PathBuf>,
    detector: Option<DetectorMode>,
    source: Option<SourceSettings>,
    overlay: Option<OverlaySettings>,
    geometry: Option<GeometryThresholds>,
    edge: Option<EdgeSettings>,
    adaptive: Option<AdaptiveSettings>,
    neural: Option<NeuralSettings>,
    presence: Option<PresenceSettings>,
}

/// Everything the daemon reads at start.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceConfig {
    pub addr: String,
    pub jpeg_quality: u8,
    pub samples_dir: PathBuf,
    pub source: SourceSettings,
    pub overlay: OverlaySettings,
    pub pipeline: PipelineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    /// File named by `BOXWATCH_CONFIG` (if any), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BOXWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ServiceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let pipeline = PipelineConfig {
            mode: file.detector.unwrap_or(DetectorMode::ClassicalEdge),
            geometry: file.geometry.unwrap_or_default(),
            edge: file.edge.unwrap_or_default(),
            adaptive: file.adaptive.unwrap_or_default(),
            neural: file.neural.unwrap_or_default(),
            presence: file.presence.unwrap_or_default(),
        };
        Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            samples_dir: file
                .samples_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAMPLES_DIR)),
            source: file.source.unwrap_or_default(),
            overlay: file.overlay.unwrap_or_default(),
            pipeline,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_string("BOXWATCH_ADDR") {
            self.addr = addr;
        }
        if let Some(url) = env_string("BOXWATCH_SOURCE") {
            self.source.url = url;
        }
        if let Some(width) = env_parse::<u32>("BOXWATCH_WIDTH")? {
            self.source.width = width;
        }
        if let Some(height) = env_parse::<u32>("BOXWATCH_HEIGHT")? {
            self.source.height = height;
        }
        if let Some(mode) = env_parse::<DetectorMode>("BOXWATCH_DETECTOR")? {
            self.pipeline.mode = mode;
        }
        if let Some(paths) = env_string("BOXWATCH_MODEL_PATHS") {
            let parsed: Vec<PathBuf> = split_csv(&paths).into_iter().map(PathBuf::from).collect();
            if !parsed.is_empty() {
                self.pipeline.neural.model_paths = parsed;
            }
        }
        if let Some(quality) = env_parse::<u8>("BOXWATCH_JPEG_QUALITY")? {
            self.jpeg_quality = quality;
        }
        if let Some(skip) = env_parse::<u32>("BOXWATCH_FRAME_SKIP")? {
            self.pipeline.neural.frame_skip = skip;
        }
        if let Some(warmup) = env_parse::<u64>("BOXWATCH_WARMUP_FRAMES")? {
            self.pipeline.presence.warmup_frames = warmup;
        }
        if let Some(dir) = env_string("BOXWATCH_SAMPLES_DIR") {
            self.samples_dir = PathBuf::from(dir);
        }
        if let Some(font) = env_string("BOXWATCH_FONT") {
            self.overlay.font_path = Some(PathBuf::from(font));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "resolution must be non-zero (got {}x{})",
                self.source.width,
                self.source.height
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must lie in 1..=100 (got {})",
                self.jpeg_quality
            ));
        }
        if self.addr.trim().is_empty() {
            return Err(anyhow!("listen address must not be empty"));
        }
        self.pipeline.validate()
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{} has an invalid value {:?}: {}", name, raw, e)),
        None => Ok(None),
    }
}

fn require_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("{} must be a finite, non-negative number (got {})", name, value));
    }
    Ok(())
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("{} must be a finite, positive number (got {})", name, value));
    }
    Ok(())
}

fn in_unit_interval(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
