// beltsight-detect/src/engine.rs
use crate::{BoxDecoder, DetectError, Detection, Inference, Result, SuppressionFilter};
use beltsight_camera::Frame;
use beltsight_preprocess::Preprocessor;

/// Rectangular sub-region of the frame in fractional coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl Roi {
    /// Requires `0 <= x1 < x2 <= 1` and `0 <= y1 < y2 <= 1`.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if !(0.0 <= x1 && x1 < x2 && x2 <= 1.0) {
            return Err(DetectError::InvalidRoi(format!("x bounds must satisfy 0 <= x1 < x2 <= 1, got {x1}..{x2}")));
        }
        if !(0.0 <= y1 && y1 < y2 && y2 <= 1.0) {
            return Err(DetectError::InvalidRoi(format!("y bounds must satisfy 0 <= y1 < y2 <= 1, got {y1}..{y2}")));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Pixel rectangle for a `width`×`height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let (w, h) = (width as f32, height as f32);
        (self.x1 * w, self.y1 * h, self.x2 * w, self.y2 * h)
    }

    /// True when the centre of `det` lies inside the region (edges inclusive).
    pub fn contains(&self, det: &Detection, width: u32, height: u32) -> bool {
        let (rx1, ry1, rx2, ry2) = self.to_pixels(width, height);
        let (cx, cy) = det.center();
        (rx1..=rx2).contains(&cx) && (ry1..=ry2).contains(&cy)
    }
}

/// Per-call knobs, copied out of the pipeline's performance state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub confidence: f32,
    pub nms: f32,
    pub max_detections: usize,
    /// Minimum box width and height in frame pixels.
    pub min_box_size: f32,
    pub roi: Option<Roi>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self { confidence: 0.5, nms: 0.4, max_detections: 10, min_box_size: 0.0, roi: None }
    }
}

/// Owns one frame's worth of work: preprocess → infer → decode → filter →
/// top-K → NMS.  Frame-skip decisions live with the caller; every call here
/// runs inference exactly once.
pub struct DetectionEngine<I> {
    backend: I,
    preprocessor: Preprocessor,
    decoder: BoxDecoder,
}

impl<I: Inference> DetectionEngine<I> {
    pub fn new(backend: I, preprocessor: Preprocessor, decoder: BoxDecoder) -> Self {
        Self { backend, preprocessor, decoder }
    }

    pub fn decoder(&self) -> &BoxDecoder {
        &self.decoder
    }

    pub fn backend_mut(&mut self) -> &mut I {
        &mut self.backend
    }

    pub fn detect(&mut self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>> {
        let input = self.preprocessor.run(frame)?;
        let output = self.backend.infer(input)?;
        let anchors = self.decoder.anchors_view(&output)?;

        let mut dets = self
            .decoder
            .decode(anchors, params.confidence, frame.width, frame.height)?;
        let decoded = dets.len();

        dets.retain(|d| d.width() >= params.min_box_size && d.height() >= params.min_box_size);
        if let Some(roi) = &params.roi {
            dets.retain(|d| roi.contains(d, frame.width, frame.height));
        }

        let kept = SuppressionFilter::new(params.nms, params.max_detections).apply(dets);
        log::debug!("decoded {decoded} candidates, kept {}", kept.len());
        Ok(kept)
    }
}

/// Share of the frame covered by the detection boxes, in percent (overlaps
/// are counted twice, the result is capped at 100).
pub fn coverage_percent(dets: &[Detection], width: u32, height: u32) -> f32 {
    let frame_area = width as f32 * height as f32;
    if frame_area <= 0.0 {
        return 0.0;
    }
    let covered: f32 = dets.iter().map(Detection::area).sum();
    (covered / frame_area * 100.0).min(100.0)
}
