// beltsight-detect/src/nms.rs
// ------------------------------------------------------------
// helpers: IoU • top-K • greedy NMS
// ------------------------------------------------------------

use crate::Detection;

/// Intersection over union of two corner boxes.
///
/// Intersection edges are the max of the left/top edges and the min of the
/// right/bottom edges.  Zero-area, inverted or non-finite boxes give `0.0`.
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);

    let union = a.area() + b.area() - inter;
    if !(union > 0.0) || !inter.is_finite() || !union.is_finite() {
        return 0.0;
    }
    inter / union
}

/// Keep the `k` most confident boxes, highest first.  The sort is stable, so
/// equal scores keep their input order.
pub fn top_k(dets: &mut Vec<Detection>, k: usize) {
    dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    dets.truncate(k);
}

/// Greedy non-maximum suppression over at most `max_candidates` boxes.
#[derive(Debug, Clone, Copy)]
pub struct SuppressionFilter {
    threshold: f32,
    max_candidates: usize,
}

impl SuppressionFilter {
    /// `max_candidates` bounds the quadratic pass; it is clamped to at least 1.
    pub fn new(threshold: f32, max_candidates: usize) -> Self {
        Self { threshold, max_candidates: max_candidates.max(1) }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// Returns a subset of `dets` ordered by descending confidence in which
    /// no two boxes overlap with IoU `>= threshold`.
    pub fn apply(&self, mut dets: Vec<Detection>) -> Vec<Detection> {
        top_k(&mut dets, self.max_candidates);

        let mut keep: Vec<Detection> = Vec::with_capacity(dets.len());
        'outer: for d in dets {
            for k in &keep {
                if iou(&d, k) >= self.threshold {
                    continue 'outer;
                }
            }
            keep.push(d);
        }
        keep
    }
}
