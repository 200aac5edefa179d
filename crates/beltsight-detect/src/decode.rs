// beltsight-detect/src/decode.rs
//
// Raw head layout, one column per anchor:
//   row 0..4   cx, cy, w, h
//   row 4..    per-class confidence (a single row for one-class models)

use crate::{DetectError, Detection, Result};
use ndarray::{ArrayD, ArrayView2, Axis, Ix2};

/// Unit of the box rows in the raw tensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BoxCoords {
    /// `0..1` relative to the model input (TFLite exports)
    #[default]
    Normalized,
    /// pixels of the model input (`imgsz`-space ONNX exports)
    InputPixels { width: f32, height: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct BoxDecoder {
    num_classes: usize,
    coords: BoxCoords,
}

impl Default for BoxDecoder {
    fn default() -> Self {
        Self::new(1)
    }
}

impl BoxDecoder {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes: num_classes.max(1), coords: BoxCoords::Normalized }
    }

    pub fn with_coords(mut self, coords: BoxCoords) -> Self {
        self.coords = coords;
        self
    }

    /// Rows per anchor: four box parameters plus one score per class.
    pub fn rows(&self) -> usize {
        4 + self.num_classes
    }

    /// View a raw model output as `[rows, N]`.
    ///
    /// Accepts `[rows, N]`, `[1, rows, N]` and the transposed `[N, rows]`,
    /// `[1, N, rows]` exports.  When both axes match, anchors-last wins.
    pub fn anchors_view<'a>(&self, output: &'a ArrayD<f32>) -> Result<ArrayView2<'a, f32>> {
        let rows = self.rows();
        let shape_err = || DetectError::OutputShape { expected_rows: rows, shape: output.shape().to_vec() };

        let view = match output.ndim() {
            2 => output.view(),
            3 if output.shape()[0] == 1 => output.index_axis(Axis(0), 0),
            _ => return Err(shape_err()),
        };
        let view = view.into_dimensionality::<Ix2>().map_err(|_| shape_err())?;

        if view.nrows() == rows {
            Ok(view)
        } else if view.ncols() == rows {
            Ok(view.reversed_axes())
        } else {
            Err(shape_err())
        }
    }

    /// Decode every anchor scoring `>= threshold` into a pixel-space box
    /// clamped to `width`×`height`.  Anchors below threshold are rejected
    /// before any box math and never allocate.
    pub fn decode(
        &self,
        output: ArrayView2<'_, f32>,
        threshold: f32,
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>> {
        if output.nrows() != self.rows() {
            return Err(DetectError::OutputShape {
                expected_rows: self.rows(),
                shape: output.shape().to_vec(),
            });
        }

        let (img_w, img_h) = (width as f32, height as f32);
        let (norm_w, norm_h) = match self.coords {
            BoxCoords::Normalized => (1.0, 1.0),
            BoxCoords::InputPixels { width, height } => (width, height),
        };

        let mut dets = Vec::new();
        for anchor in output.columns() {
            // -------- best class ---------------
            let (class_id, confidence) = if self.num_classes == 1 {
                (0, anchor[4])
            } else {
                anchor
                    .iter()
                    .skip(4)
                    .copied()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, c)| if c > best.1 { (i, c) } else { best })
            };
            if !(confidence >= threshold) || !confidence.is_finite() {
                continue;
            }

            // -------- decode centre + size -----
            let cx = anchor[0] / norm_w;
            let cy = anchor[1] / norm_h;
            let w = anchor[2] / norm_w;
            let h = anchor[3] / norm_h;

            let x1 = ((cx - w / 2.0) * img_w).clamp(0.0, img_w);
            let y1 = ((cy - h / 2.0) * img_h).clamp(0.0, img_h);
            let x2 = ((cx + w / 2.0) * img_w).clamp(0.0, img_w);
            let y2 = ((cy + h / 2.0) * img_h).clamp(0.0, img_h);

            // fully off-frame or NaN boxes collapse here
            if !(x2 > x1 && y2 > y1) {
                continue;
            }
            dets.push(Detection { x1, y1, x2, y2, confidence: confidence.min(1.0), class_id });
        }
        Ok(dets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2, Array3};

    fn assert_box(d: &Detection, expected: [f32; 4]) {
        let got = [d.x1, d.y1, d.x2, d.y2];
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() <= 1.0, "got {got:?}, expected {expected:?}");
        }
    }

    #[test]
    fn single_anchor_scenario() {
        let out = arr2(&[[0.5], [0.5], [0.2], [0.2], [0.9]]);
        let dets = BoxDecoder::new(1).decode(out.view(), 0.5, 640, 480).unwrap();
        assert_eq!(dets.len(), 1);
        assert_box(&dets[0], [256.0, 192.0, 384.0, 288.0]);
        assert_eq!(dets[0].confidence, 0.9);
        assert_eq!(dets[0].class_id, 0);
    }

    #[test]
    fn wider_anchor_scenario() {
        let out = arr2(&[[0.5], [0.5], [0.3], [0.3], [0.9]]);
        let dets = BoxDecoder::new(1).decode(out.view(), 0.5, 640, 480).unwrap();
        assert_box(&dets[0], [224.0, 168.0, 416.0, 312.0]);
    }

    #[test]
    fn below_threshold_is_dropped_and_edges_clamped() {
        let out = arr2(&[
            [0.05, 0.5, 0.98],
            [0.05, 0.5, 0.5],
            [0.2, 0.2, 0.2],
            [0.2, 0.2, 0.2],
            [0.7, 0.49, 0.5],
        ]);
        let dets = BoxDecoder::new(1).decode(out.view(), 0.5, 100, 100).unwrap();
        assert_eq!(dets.len(), 2);
        for d in &dets {
            assert!(d.confidence >= 0.5);
            assert!(d.x1 >= 0.0 && d.y1 >= 0.0 && d.x2 <= 100.0 && d.y2 <= 100.0);
        }
        assert_eq!(dets[0].x1, 0.0);
        assert_eq!(dets[1].x2, 100.0);
    }

    #[test]
    fn multi_class_takes_arg_max() {
        // 4 box rows + 3 classes
        let out = arr2(&[[0.5], [0.5], [0.1], [0.1], [0.2], [0.8], [0.6]]);
        let dets = BoxDecoder::new(3).decode(out.view(), 0.5, 10, 10).unwrap();
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].confidence, 0.8);
    }

    #[test]
    fn input_pixel_coordinates_are_normalised() {
        let out = arr2(&[[320.0], [320.0], [64.0], [64.0], [0.9]]);
        let dec = BoxDecoder::new(1).with_coords(BoxCoords::InputPixels { width: 640.0, height: 640.0 });
        let d = dec.decode(out.view(), 0.5, 640, 480).unwrap()[0];
        assert!((d.x1 - 288.0).abs() < 1e-3);
        assert!((d.y2 - 264.0).abs() < 1e-3);
    }

    #[test]
    fn anchors_view_accepts_batched_and_transposed() {
        let dec = BoxDecoder::new(1);

        let batched = Array3::<f32>::zeros((1, 5, 8400)).into_dyn();
        assert_eq!(dec.anchors_view(&batched).unwrap().shape(), &[5, 8400]);

        let transposed = Array3::<f32>::zeros((1, 8400, 5)).into_dyn();
        assert_eq!(dec.anchors_view(&transposed).unwrap().shape(), &[5, 8400]);

        let flat = Array2::<f32>::zeros((5, 3)).into_dyn();
        assert_eq!(dec.anchors_view(&flat).unwrap().shape(), &[5, 3]);
    }

    #[test]
    fn anchors_view_rejects_wrong_layout() {
        let dec = BoxDecoder::new(1);
        let wrong = Array3::<f32>::zeros((1, 84, 8400)).into_dyn();
        assert!(matches!(
            dec.anchors_view(&wrong),
            Err(DetectError::OutputShape { expected_rows: 5, .. })
        ));
        let batch2 = Array3::<f32>::zeros((2, 5, 10)).into_dyn();
        assert!(dec.anchors_view(&batch2).is_err());
    }
}
