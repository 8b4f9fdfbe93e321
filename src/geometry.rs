//! Geometry filter.
//!
//! Pure functions that decide whether a traced outline qualifies as a "box"
//! and score it. Two shapes are accepted:
//!
//! - a convex 4-vertex polygon, scored against its axis-aligned extent;
//! - any other outline, scored against its minimum-area rotated rectangle
//!   with a separate (usually looser) rectangularity floor.
//!
//! Nothing here holds state: identical geometry and thresholds always give
//! the same verdict.

use imageproc::geometry::min_area_rect;
use imageproc::point::Point;

use crate::config::GeometryThresholds;

/// Axis-aligned rectangle in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl AxisRect {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            w: (x2 - x1).max(0.0),
            h: (y2 - y1).max(0.0),
        }
    }

    pub fn x2(&self) -> f32 {
        self.x + self.w
    }

    pub fn y2(&self) -> f32 {
        self.y + self.h
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn intersection_area(&self, other: &AxisRect) -> f32 {
        let l = self.x.max(other.x);
        let r = self.x2().min(other.x2());
        let t = self.y.max(other.y);
        let b = self.y2().min(other.y2());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    /// Intersection over union; 0 when both boxes are empty.
    pub fn iou(&self, other: &AxisRect) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Minimum-area rectangle at arbitrary orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotatedRect {
    pub center: (f32, f32),
    pub size: (f32, f32),
    /// Orientation of the first edge, degrees.
    pub angle_deg: f32,
    pub corners: [(f32, f32); 4],
}

impl RotatedRect {
    pub fn area(&self) -> f32 {
        self.size.0 * self.size.1
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Region {
    Axis(AxisRect),
    Rotated(RotatedRect),
}

impl Region {
    /// Axis-aligned extent of the region.
    pub fn bounds(&self) -> AxisRect {
        match self {
            Region::Axis(rect) => *rect,
            Region::Rotated(rect) => {
                let (mut x1, mut y1) = (f32::MAX, f32::MAX);
                let (mut x2, mut y2) = (f32::MIN, f32::MIN);
                for &(x, y) in &rect.corners {
                    x1 = x1.min(x);
                    y1 = y1.min(y);
                    x2 = x2.max(x);
                    y2 = y2.max(y);
                }
                AxisRect::from_corners(x1, y1, x2, y2)
            }
        }
    }

    /// Polygon corners in drawing order.
    pub fn corners(&self) -> [(f32, f32); 4] {
        match self {
            Region::Axis(r) => [(r.x, r.y), (r.x2(), r.y), (r.x2(), r.y2()), (r.x, r.y2())],
            Region::Rotated(r) => r.corners,
        }
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Region {
        match self {
            Region::Axis(r) => Region::Axis(AxisRect {
                x: r.x + dx,
                y: r.y + dy,
                ..*r
            }),
            Region::Rotated(r) => {
                let mut corners = r.corners;
                for c in corners.iter_mut() {
                    c.0 += dx;
                    c.1 += dy;
                }
                Region::Rotated(RotatedRect {
                    center: (r.center.0 + dx, r.center.1 + dy),
                    corners,
                    ..*r
                })
            }
        }
    }
}

/// An accepted box-like region for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub region: Region,
    /// Measured area of the source outline, pixels.
    pub area: f64,
    /// Long side over short side (classical) or w/h (neural).
    pub aspect: f64,
    pub rectangularity: f64,
    /// Model confidence; neural pipeline only.
    pub score: Option<f32>,
    pub class_id: Option<usize>,
}

impl Candidate {
    pub fn translate(&self, dx: f32, dy: f32) -> Candidate {
        Candidate {
            region: self.region.translate(dx, dy),
            ..self.clone()
        }
    }
}

/// Absolute shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice as f64 / 2.0).abs()
}

/// True when every turn of the closed polygon has the same, non-zero sign.
pub fn is_convex(points: &[Point<i32>]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0i64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let cross = (b.x - a.x) as i64 * (c.y - b.y) as i64 - (b.y - a.y) as i64 * (c.x - b.x) as i64;
        if cross == 0 {
            return false;
        }
        let s = cross.signum();
        if sign == 0 {
            sign = s;
        } else if s != sign {
            return false;
        }
    }
    true
}

/// Axis-aligned extent `(x, y, w, h)` of a point set; `w`/`h` are max - min.
pub fn bounding_extent(points: &[Point<i32>]) -> Option<(i32, i32, i32, i32)> {
    let first = points.first()?;
    let (mut x1, mut y1, mut x2, mut y2) = (first.x, first.y, first.x, first.y);
    for p in points {
        x1 = x1.min(p.x);
        y1 = y1.min(p.y);
        x2 = x2.max(p.x);
        y2 = y2.max(p.y);
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// Smallest enclosing rectangle at any orientation.
pub fn rotated_rect(points: &[Point<i32>]) -> Option<RotatedRect> {
    if points.len() < 3 {
        return None;
    }
    let corners = min_area_rect(points);
    let corners = corners.map(|p| (p.x as f32, p.y as f32));
    let edge = |a: (f32, f32), b: (f32, f32)| ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
    let w = edge(corners[0], corners[1]);
    let h = edge(corners[1], corners[2]);
    let cx = corners.iter().map(|c| c.0).sum::<f32>() / 4.0;
    let cy = corners.iter().map(|c| c.1).sum::<f32>() / 4.0;
    let angle_deg = (corners[1].1 - corners[0].1)
        .atan2(corners[1].0 - corners[0].0)
        .to_degrees();
    Some(RotatedRect {
        center: (cx, cy),
        size: (w, h),
        angle_deg,
        corners,
    })
}

/// Classify an outline.
///
/// `outline` is either a polygon approximation or the raw contour;
/// `contour_area` is always the measured area of the raw contour. A convex
/// quad is scored on its axis-aligned extent, anything else on its rotated
/// rectangle.
pub fn classify(
    outline: &[Point<i32>],
    contour_area: f64,
    frame_area: f64,
    t: &GeometryThresholds,
) -> Option<Candidate> {
    if !area_in_range(contour_area, frame_area, t) {
        return None;
    }
    if outline.len() == 4 && is_convex(outline) {
        classify_quad(outline, contour_area, t)
    } else {
        classify_rotated(outline, contour_area, t)
    }
}

fn area_in_range(area: f64, frame_area: f64, t: &GeometryThresholds) -> bool {
    area >= t.min_area_fraction * frame_area && area <= t.max_area_fraction * frame_area
}

fn aspect_in_range(aspect: f64, t: &GeometryThresholds) -> bool {
    aspect >= t.min_aspect && aspect <= t.max_aspect
}

pub fn classify_quad(quad: &[Point<i32>], contour_area: f64, t: &GeometryThresholds) -> Option<Candidate> {
    let (x, y, w, h) = bounding_extent(quad)?;
    if w <= 0 || h <= 0 {
        return None;
    }
    let (w, h) = (w as f64, h as f64);
    let aspect = w.max(h) / w.min(h);
    let rectangularity = contour_area / (w * h);
    if !aspect_in_range(aspect, t) || rectangularity <= t.min_rectangularity {
        return None;
    }
    Some(Candidate {
        region: Region::Axis(AxisRect {
            x: x as f32,
            y: y as f32,
            w: w as f32,
            h: h as f32,
        }),
        area: contour_area,
        aspect,
        rectangularity,
        score: None,
        class_id: None,
    })
}

pub fn classify_rotated(
    contour: &[Point<i32>],
    contour_area: f64,
    t: &GeometryThresholds,
) -> Option<Candidate> {
    let rect = rotated_rect(contour)?;
    let (w, h) = (rect.size.0 as f64, rect.size.1 as f64);
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let aspect = w.max(h) / w.min(h);
    let rectangularity = contour_area / (w * h);
    if !aspect_in_range(aspect, t) || rectangularity <= t.min_rotated_rectangularity {
        return None;
    }
    Some(Candidate {
        region: Region::Rotated(rect),
        area: contour_area,
        aspect,
        rectangularity,
        score: None,
        class_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> GeometryThresholds {
        GeometryThresholds::default()
    }

    fn square(x: i32, y: i32, side: i32) -> Vec<Point<i32>> {
        vec![
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ]
    }

    #[test]
    fn shoelace_area_of_square() {
        assert_eq!(polygon_area(&square(0, 0, 10)), 100.0);
        assert_eq!(polygon_area(&square(0, 0, 10)[..2]), 0.0);
    }

    #[test]
    fn convexity_rejects_dart() {
        assert!(is_convex(&square(0, 0, 10)));
        let dart = vec![
            Point::new(0, 0),
            Point::new(10, 5),
            Point::new(0, 10),
            Point::new(3, 5),
        ];
        assert!(!is_convex(&dart));
    }

    #[test]
    fn accepts_clean_quad() {
        let quad = square(100, 100, 80);
        let area = polygon_area(&quad);
        let cand = classify(&quad, area, 640.0 * 480.0, &thresholds()).expect("accepted");
        assert!(matches!(cand.region, Region::Axis(_)));
        assert!((cand.rectangularity - 1.0).abs() < 1e-9);
        assert!((cand.aspect - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_out_of_range_area() {
        let tiny = square(0, 0, 5);
        assert!(classify(&tiny, polygon_area(&tiny), 640.0 * 480.0, &thresholds()).is_none());
        let huge = square(0, 0, 630);
        assert!(classify(&huge, polygon_area(&huge), 640.0 * 480.0, &thresholds()).is_none());
    }

    #[test]
    fn rejects_elongated_quad() {
        let strip = vec![
            Point::new(0, 0),
            Point::new(400, 0),
            Point::new(400, 40),
            Point::new(0, 40),
        ];
        let area = polygon_area(&strip);
        assert!(classify(&strip, area, 640.0 * 480.0, &thresholds()).is_none());
    }

    #[test]
    fn degenerate_extent_never_divides() {
        let line = vec![
            Point::new(0, 0),
            Point::new(50, 0),
            Point::new(100, 0),
            Point::new(150, 0),
        ];
        assert!(classify_quad(&line, 5_000.0, &thresholds()).is_none());
    }

    #[test]
    fn non_quad_outline_falls_back_to_rotated_rect() {
        // Axis-aligned octagon with clipped corners.
        let outline = vec![
            Point::new(102, 100),
            Point::new(198, 100),
            Point::new(200, 102),
            Point::new(200, 198),
            Point::new(198, 200),
            Point::new(102, 200),
            Point::new(100, 198),
            Point::new(100, 102),
        ];
        let area = polygon_area(&outline);
        let cand = classify(&outline, area, 640.0 * 480.0, &thresholds()).expect("accepted");
        assert!(matches!(cand.region, Region::Rotated(_)));
        assert!(cand.rectangularity > 0.9);
    }

    #[test]
    fn classification_is_deterministic() {
        let quad = square(10, 20, 60);
        let area = polygon_area(&quad);
        let a = classify(&quad, area, 320.0 * 240.0, &thresholds());
        let b = classify(&quad, area, 320.0 * 240.0, &thresholds());
        assert_eq!(a, b);
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = AxisRect::from_corners(0.0, 0.0, 10.0, 10.0);
        let b = AxisRect::from_corners(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn translate_moves_rotated_corners() {
        let rect = rotated_rect(&square(10, 10, 20)).expect("rect");
        let moved = Region::Rotated(rect).translate(-10.0, -10.0);
        let bounds = moved.bounds();
        assert!((bounds.x - 0.0).abs() < 1e-3);
        assert!((bounds.y - 0.0).abs() < 1e-3);
    }
}
