// beltsight-detect/src/lib.rs
// ============================================================
// beltsight-detect  –  Object-detection stage
// Runs a single-output YOLO-style network (raw `[4 + classes, N]`
// tensor, no baked-in NMS) through a pluggable inference back-end.
// ------------------------------------------------------------
// Pipeline: Frame → Array4<f32> → raw tensor → Vec<Detection>
// ------------------------------------------------------------
// Public API
//   * DetectionEngine::detect(frame, params) – Vec<Detection>
//   * BoxDecoder / SuppressionFilter       – the two pure stages
//   * Inference                            – back-end trait
//       TractBackend (feature `tract`, default)
//       OrtBackend   (feature `ort`)
//       TimedInference – worker thread + max wait, wraps any backend
// ============================================================

//! beltsight – detection layer
//!
//! The crate is split along the data flow: [`BoxDecoder`] turns the raw
//! output tensor into pixel-space [`Detection`] candidates,
//! [`SuppressionFilter`] caps and de-duplicates them, and
//! [`DetectionEngine`] glues preprocessing, inference and the filters
//! together for one frame.
//!
//! Inference failures are always surfaced as [`DetectError`]; an empty
//! vector only ever means "nothing above threshold".

use ndarray::{Array4, ArrayD};
use thiserror::Error;

mod backends;
mod decode;
mod engine;
mod nms;
mod timed;

pub use backends::*;
pub use decode::{BoxCoords, BoxDecoder};
pub use engine::{coverage_percent, DetectParams, DetectionEngine, Roi};
pub use nms::{iou, top_k, SuppressionFilter};
pub use timed::TimedInference;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("inference back-end failed: {0}")]
    Backend(String),
    #[cfg(feature = "tract")]
    #[error("tract error: {0}")]
    Tract(#[from] tract_onnx::prelude::TractError),
    #[cfg(feature = "ort")]
    #[error("onnxruntime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("invalid output shape: expected [{expected_rows}, N] (optionally batched or transposed), got {shape:?}")]
    OutputShape { expected_rows: usize, shape: Vec<usize> },
    #[error("invalid input shape: model expects {expected:?}, got {got:?}")]
    InputShape { expected: Vec<usize>, got: Vec<usize> },
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] beltsight_preprocess::PreprocessError),
    #[error("inference did not return within {0:?}")]
    Timeout(std::time::Duration),
    #[error("previous inference call is still running")]
    Busy,
    #[error("inference worker is gone")]
    WorkerGone,
    #[error("invalid region of interest: {0}")]
    InvalidRoi(String),
}

pub type Result<T> = std::result::Result<T, DetectError>;

/// One object: pixel-space corner box plus score.
/// Invariant: `x1 < x2`, `y1 < y2`, `confidence` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> Self {
        Self { x1, y1, x2, y2, confidence, class_id }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Trait for inference back-ends: fixed-shape input tensor in, raw output
/// tensor out.  Implementations are synchronous and may fail.
pub trait Inference {
    fn infer(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>>;
}

impl<I: Inference + ?Sized> Inference for Box<I> {
    fn infer(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        (**self).infer(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_helpers() {
        let d = Detection::new(10.0, 20.0, 30.0, 60.0, 0.9, 0);
        assert_eq!(d.width(), 20.0);
        assert_eq!(d.height(), 40.0);
        assert_eq!(d.area(), 800.0);
        assert_eq!(d.center(), (20.0, 40.0));
    }

    #[test]
    fn inverted_box_has_no_area() {
        let d = Detection::new(30.0, 20.0, 10.0, 60.0, 0.9, 0);
        assert_eq!(d.area(), 0.0);
    }
}
