use std::cmp::Ordering;

use super::decode::ScoredBox;

/// Greedy non-max suppression.
///
/// Boxes are visited in descending score order; a box survives only if its
/// IoU with every box already kept is at or below `iou_threshold`.
pub fn non_max_suppression(mut boxes: Vec<ScoredBox>, iou_threshold: f32) -> Vec<ScoredBox> {
    boxes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept = 0;
    for index in 0..boxes.len() {
        let overlaps = boxes[..kept]
            .iter()
            .any(|prev| prev.rect.iou(&boxes[index].rect) > iou_threshold);
        if !overlaps {
            boxes.swap(kept, index);
            kept += 1;
        }
    }
    boxes.truncate(kept);
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::AxisRect;

    fn scored(x: f32, y: f32, side: f32, score: f32) -> ScoredBox {
        ScoredBox {
            rect: AxisRect::from_corners(x, y, x + side, y + side),
            score,
            class_id: 0,
        }
    }

    #[test]
    fn keeps_best_of_overlapping_pair() {
        let kept = non_max_suppression(
            vec![scored(0.0, 0.0, 10.0, 0.6), scored(1.0, 1.0, 10.0, 0.9)],
            0.45,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn disjoint_boxes_survive_in_score_order() {
        let kept = non_max_suppression(
            vec![
                scored(0.0, 0.0, 10.0, 0.3),
                scored(50.0, 50.0, 10.0, 0.8),
                scored(100.0, 0.0, 10.0, 0.5),
            ],
            0.45,
        );
        let scores: Vec<f32> = kept.iter().map(|b| b.score).collect();
        assert_eq!(scores, vec![0.8, 0.5, 0.3]);
    }

    #[test]
    fn no_retained_pair_exceeds_threshold() {
        let mut boxes = Vec::new();
        for i in 0..40 {
            let offset = (i % 10) as f32 * 3.0;
            boxes.push(scored(offset, offset * 0.5, 20.0, 1.0 - i as f32 * 0.01));
        }
        let threshold = 0.3;
        let kept = non_max_suppression(boxes, threshold);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(a.rect.iou(&b.rect) <= threshold);
            }
        }
    }

    #[test]
    fn empty_input() {
        assert!(non_max_suppression(Vec::new(), 0.5).is_empty());
    }
}
