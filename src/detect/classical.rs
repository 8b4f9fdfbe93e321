//! Classical box detection.
//!
//! One contour pipeline with two preprocessing policies:
//!
//! - `Edges`: blur, Canny, dilate. Only convex quads are considered.
//! - `AdaptiveThreshold`: CLAHE on luma, inverted local threshold, median,
//!   closing, then a padded mask so border-touching boxes still close. If no
//!   quad is accepted, the single largest rotated-rectangle candidate across
//!   all contours is reported instead.
//!
//! Reported coordinates are always in original-frame pixels.

use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use imageproc::contours::find_contours;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;

use crate::config::{AdaptiveSettings, DetectorMode, EdgeSettings, GeometryThresholds, PipelineConfig};
use crate::detect::backend::BoxDetector;
use crate::detect::preprocess;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;
use crate::geometry::{self, Candidate};

#[derive(Clone, Debug, PartialEq)]
pub enum Preprocess {
    Edges(EdgeSettings),
    AdaptiveThreshold(AdaptiveSettings),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassicalSettings {
    pub preprocess: Preprocess,
    pub geometry: GeometryThresholds,
}

impl ClassicalSettings {
    pub fn edge_based(config: &PipelineConfig) -> Self {
        Self {
            preprocess: Preprocess::Edges(config.edge.clone()),
            geometry: config.geometry.clone(),
        }
    }

    pub fn adaptive(config: &PipelineConfig) -> Self {
        Self {
            preprocess: Preprocess::AdaptiveThreshold(config.adaptive.clone()),
            geometry: config.geometry.clone(),
        }
    }

    /// Settings for the configured classical mode; `None` in neural mode.
    pub fn from_config(config: &PipelineConfig) -> Option<Self> {
        match config.mode {
            DetectorMode::ClassicalEdge => Some(Self::edge_based(config)),
            DetectorMode::ClassicalAdaptive => Some(Self::adaptive(config)),
            DetectorMode::Neural => None,
        }
    }

    fn pad_margin(&self) -> u32 {
        match &self.preprocess {
            Preprocess::Edges(_) => 0,
            Preprocess::AdaptiveThreshold(a) => a.pad_margin,
        }
    }

    fn epsilon_fraction(&self) -> f64 {
        match &self.preprocess {
            Preprocess::Edges(e) => e.epsilon_fraction,
            Preprocess::AdaptiveThreshold(a) => a.epsilon_fraction,
        }
    }

    fn rotated_fallback(&self) -> bool {
        matches!(self.preprocess, Preprocess::AdaptiveThreshold(_))
    }
}

pub struct ClassicalDetector {
    settings: ClassicalSettings,
}

impl ClassicalDetector {
    pub fn new(settings: ClassicalSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ClassicalSettings {
        &self.settings
    }

    /// Accepted regions for one image.
    pub fn analyze(&self, image: &RgbImage) -> Vec<Candidate> {
        let mask = match &self.settings.preprocess {
            Preprocess::Edges(e) => preprocess::edge_mask(image, e),
            Preprocess::AdaptiveThreshold(a) => preprocess::adaptive_mask(image, a),
        };
        let margin = self.settings.pad_margin();
        let mask = preprocess::pad(&mask, margin);
        let frame_area = image.width() as f64 * image.height() as f64;
        let eps_fraction = self.settings.epsilon_fraction();
        let geom = &self.settings.geometry;

        let mut accepted = Vec::new();
        let mut largest_rotated: Option<Candidate> = None;

        for contour in find_contours::<i32>(&mask) {
            if contour.parent.is_some() || contour.points.len() < 3 {
                continue;
            }
            let points = &contour.points;
            let area = geometry::polygon_area(points);
            let epsilon = eps_fraction * arc_length(points, true);
            let approx = close_polygon(approximate_polygon_dp(points, epsilon, true));

            if approx.len() == 4 && geometry::is_convex(&approx) {
                if let Some(candidate) = geometry::classify(&approx, area, frame_area, geom) {
                    accepted.push(candidate);
                    continue;
                }
            }

            if self.settings.rotated_fallback() {
                let rotated = geometry::classify(points, area, frame_area, geom)
                    .filter(|c| matches!(c.region, geometry::Region::Rotated(_)));
                if let Some(candidate) = rotated {
                    let larger = largest_rotated
                        .as_ref()
                        .map_or(true, |best| candidate.area > best.area);
                    if larger {
                        largest_rotated = Some(candidate);
                    }
                }
            }
        }

        if accepted.is_empty() {
            accepted.extend(largest_rotated);
        }

        if margin > 0 {
            let offset = -(margin as f32);
            accepted = accepted
                .iter()
                .map(|c| c.translate(offset, offset))
                .collect();
        }
        accepted
    }
}

impl BoxDetector for ClassicalDetector {
    fn name(&self) -> &'static str {
        match self.settings.preprocess {
            Preprocess::Edges(_) => "classical-edge",
            Preprocess::AdaptiveThreshold(_) => "classical-adaptive",
        }
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let started = Instant::now();
        let candidates = self.analyze(frame.image());
        Ok(DetectionResult::new(candidates, frame.seq, started.elapsed()))
    }
}

/// Drop a trailing vertex that repeats the first one.
fn close_polygon(mut points: Vec<Point<i32>>) -> Vec<Point<i32>> {
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}
