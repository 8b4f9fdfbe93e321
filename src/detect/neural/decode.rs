use anyhow::{anyhow, Result};
use ndarray::{ArrayD, ArrayView2, Axis, Ix2};

use crate::geometry::AxisRect;

/// Box count attributes before the class vector: cx, cy, w, h, objectness.
pub const BOX_ATTRIBUTES: usize = 5;

/// A decoded detection in letterboxed-canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredBox {
    pub rect: AxisRect,
    pub score: f32,
    pub class_id: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `[attributes, detections]`
    AttributesFirst,
    /// `[detections, attributes]`
    DetectionsFirst,
}

/// Work out which axis holds the per-detection attributes.
///
/// A known attribute count wins; otherwise the smaller axis is taken as the
/// attribute axis, since detection counts are in the thousands.
pub fn layout(rows: usize, cols: usize, expected_attributes: Option<usize>) -> Layout {
    match expected_attributes {
        Some(n) if cols == n && rows != n => Layout::DetectionsFirst,
        Some(n) if rows == n && cols != n => Layout::AttributesFirst,
        _ if rows <= cols => Layout::AttributesFirst,
        _ => Layout::DetectionsFirst,
    }
}

/// Decode raw model output into scored corner boxes.
///
/// Accepts `[1, a, n]`, `[1, n, a]` or the same without the batch axis.
/// Score is objectness times the best class probability; anything below
/// `confidence` is dropped before conversion.
pub fn decode(
    output: &ArrayD<f32>,
    confidence: f32,
    expected_attributes: Option<usize>,
) -> Result<Vec<ScoredBox>> {
    let view = match output.ndim() {
        3 if output.shape()[0] == 1 => output.index_axis(Axis(0), 0),
        2 => output.view(),
        _ => return Err(anyhow!("unexpected model output shape {:?}", output.shape())),
    };
    let table: ArrayView2<f32> = view
        .into_dimensionality::<Ix2>()
        .map_err(|e| anyhow!("model output is not two-dimensional: {}", e))?;
    let (rows, cols) = table.dim();
    let table = match layout(rows, cols, expected_attributes) {
        Layout::AttributesFirst => table.reversed_axes(),
        Layout::DetectionsFirst => table,
    };
    let attributes = table.ncols();
    if attributes <= BOX_ATTRIBUTES {
        return Err(anyhow!(
            "model output has {} attributes per detection, need at least {}",
            attributes,
            BOX_ATTRIBUTES + 1
        ));
    }

    let mut boxes = Vec::new();
    for det in table.axis_iter(Axis(0)) {
        let objectness = det[4];
        let (class_id, class_prob) = det
            .iter()
            .skip(BOX_ATTRIBUTES)
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (idx, p)| {
                if p > best.1 {
                    (idx, p)
                } else {
                    best
                }
            });
        let score = objectness * class_prob;
        if !score.is_finite() || score < confidence {
            continue;
        }
        let (cx, cy, w, h) = (det[0], det[1], det[2], det[3]);
        boxes.push(ScoredBox {
            rect: AxisRect::from_corners(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
            score,
            class_id,
        });
    }
    Ok(boxes)
}
