//! Overlay rendering: region outlines, labels and the HUD.
//!
//! Text needs a TrueType font. Whether one loaded is decided once at
//! construction; without it only geometry is drawn.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{info, warn};

use crate::config::{DetectorMode, ServiceConfig};
use crate::geometry::{Candidate, Region};
use crate::presence::Presence;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const PRESENT_COLOR: Rgb<u8> = Rgb([0, 220, 0]);
const ABSENT_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const HUD_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_SCALE: f32 = 18.0;
const LINE_HEIGHT: i32 = 20;
const FPS_WINDOW: usize = 30;

/// Per-frame values the HUD shows.
#[derive(Clone, Copy, Debug)]
pub struct HudStatus {
    pub fps: f32,
    pub count: usize,
    pub presence: Presence,
}

pub struct OverlayRenderer {
    font: Option<FontVec>,
    hud: bool,
    draw_scores: bool,
    /// HUD lines that never change after start.
    static_lines: Vec<String>,
}

impl OverlayRenderer {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        let font = cfg.overlay.font_path.as_deref().and_then(|path| match load_font(path) {
            Ok(font) => {
                info!("overlay font loaded from {}", path.display());
                Some(font)
            }
            Err(err) => {
                warn!("overlay text disabled: {:#}", err);
                None
            }
        });

        let neural = &cfg.pipeline.neural;
        let mut static_lines = vec![cfg.overlay.version_label.clone()];
        match cfg.pipeline.mode {
            DetectorMode::Neural => {
                static_lines.push(format!(
                    "Res {}x{}  In {}  Skip {}  Q {}",
                    cfg.source.width, cfg.source.height, neural.input_size, neural.frame_skip, cfg.jpeg_quality
                ));
                static_lines.push(format!(
                    "Thresh conf {:.2}  iou {:.2}",
                    neural.confidence_threshold, neural.iou_threshold
                ));
            }
            mode => static_lines.push(format!(
                "Res {}x{}  {}  Q {}",
                cfg.source.width,
                cfg.source.height,
                mode.as_str(),
                cfg.jpeg_quality
            )),
        }

        Self {
            font,
            hud: cfg.overlay.hud,
            draw_scores: neural.draw_scores,
            static_lines,
        }
    }

    /// Geometry-only renderer.
    pub fn plain() -> Self {
        Self {
            font: None,
            hud: false,
            draw_scores: false,
            static_lines: Vec::new(),
        }
    }

    pub fn text_enabled(&self) -> bool {
        self.font.is_some()
    }

    /// Outline every candidate; label it when text is available.
    pub fn draw_candidates(&self, img: &mut RgbImage, candidates: &[Candidate]) {
        for candidate in candidates {
            match candidate.region {
                Region::Axis(rect) => {
                    if let Some(r) = to_rect(rect.x, rect.y, rect.w, rect.h, img) {
                        draw_hollow_rect_mut(img, r, BOX_COLOR);
                        if let Some(inner) = to_rect(rect.x + 1.0, rect.y + 1.0, rect.w - 2.0, rect.h - 2.0, img) {
                            draw_hollow_rect_mut(img, inner, BOX_COLOR);
                        }
                    }
                }
                Region::Rotated(rect) => {
                    for i in 0..4 {
                        let a = rect.corners[i];
                        let b = rect.corners[(i + 1) % 4];
                        draw_line_segment_mut(img, a, b, BOX_COLOR);
                    }
                }
            }

            if let Some(font) = &self.font {
                let bounds = candidate.region.bounds();
                let label = match (candidate.score, self.draw_scores) {
                    (Some(score), true) => format!("box {:.2}", score),
                    _ => "BOX".to_string(),
                };
                let y = (bounds.y as i32 - LINE_HEIGHT).max(0);
                draw_text_mut(img, BOX_COLOR, bounds.x as i32, y, PxScale::from(TEXT_SCALE), font, &label);
            }
        }
    }

    /// Status lines in the top-left corner plus a presence marker.
    pub fn draw_hud(&self, img: &mut RgbImage, status: &HudStatus) {
        let marker = match status.presence {
            Presence::Present => PRESENT_COLOR,
            Presence::Absent => ABSENT_COLOR,
        };
        if img.width() > 16 && img.height() > 16 {
            draw_filled_rect_mut(img, Rect::at(img.width() as i32 - 16, 4).of_size(12, 12), marker);
        }

        if !self.hud {
            return;
        }
        let Some(font) = &self.font else {
            return;
        };

        let mut lines = self.static_lines.clone();
        lines.push(format!("Boxes {}  Present {}", status.count, status.presence.is_present()));
        lines.push(format!("FPS {:.1}", status.fps));
        lines.push(format!("Time {}", chrono::Local::now().format("%H:%M:%S")));

        let height = (lines.len() as i32 * LINE_HEIGHT + 8).min(img.height() as i32);
        let width = 300.min(img.width());
        if height > 0 && width > 0 {
            draw_filled_rect_mut(img, Rect::at(0, 0).of_size(width, height as u32), HUD_BACKGROUND);
        }
        for (i, line) in lines.iter().enumerate() {
            let y = 4 + i as i32 * LINE_HEIGHT;
            draw_text_mut(img, TEXT_COLOR, 6, y, PxScale::from(TEXT_SCALE), font, line);
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).with_context(|| format!("{} is not a usable TrueType font", path.display()))
}

/// Clip a float rectangle to the image; `None` when nothing is left.
fn to_rect(x: f32, y: f32, w: f32, h: f32, img: &RgbImage) -> Option<Rect> {
    let x1 = x.round().max(0.0) as i64;
    let y1 = y.round().max(0.0) as i64;
    let x2 = ((x + w).round() as i64).min(img.width() as i64 - 1);
    let y2 = ((y + h).round() as i64).min(img.height() as i64 - 1);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::at(x1 as i32, y1 as i32).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32))
}

/// Moving average of instantaneous frame rates.
#[derive(Clone, Debug)]
pub struct FpsMeter {
    rates: VecDeque<f32>,
    last: Option<Instant>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            rates: VecDeque::with_capacity(FPS_WINDOW),
            last: None,
        }
    }

    /// Record a frame finishing at `now`; returns the current estimate.
    pub fn tick(&mut self, now: Instant) -> f32 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f32();
            if dt > 0.0 {
                if self.rates.len() == FPS_WINDOW {
                    self.rates.pop_front();
                }
                self.rates.push_back(1.0 / dt);
            }
        }
        self.last = Some(now);
        self.current()
    }

    pub fn current(&self) -> f32 {
        if self.rates.is_empty() {
            0.0
        } else {
            self.rates.iter().sum::<f32>() / self.rates.len() as f32
        }
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
