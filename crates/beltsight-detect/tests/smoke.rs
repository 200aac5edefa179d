use beltsight_camera::{ChannelOrder, Frame};
use beltsight_detect::{
    BoxDecoder, DetectError, DetectParams, Detection, DetectionEngine, Inference, Roi,
};
use beltsight_preprocess::{Preprocessor, TensorLayout};
use ndarray::{Array2, Array4, ArrayD, IxDyn};
use std::time::Duration;

/// Returns the same raw tensor for every call and counts invocations.
struct Scripted {
    output: ArrayD<f32>,
    calls: usize,
}

impl Scripted {
    /// `anchors`: (cx, cy, w, h, conf) in normalised units, laid out `[1, 5, N]`.
    fn new(anchors: &[[f32; 5]]) -> Self {
        let mut out = Array2::<f32>::zeros((5, anchors.len()));
        for (i, a) in anchors.iter().enumerate() {
            for (row, v) in a.iter().enumerate() {
                out[(row, i)] = *v;
            }
        }
        let output = out.insert_axis(ndarray::Axis(0)).into_dyn();
        Self { output, calls: 0 }
    }
}

impl Inference for Scripted {
    fn infer(&mut self, input: Array4<f32>) -> beltsight_detect::Result<ArrayD<f32>> {
        assert_eq!(input.shape(), &[1, 3, 32, 32]);
        self.calls += 1;
        Ok(self.output.clone())
    }
}

struct Failing;

impl Inference for Failing {
    fn infer(&mut self, _input: Array4<f32>) -> beltsight_detect::Result<ArrayD<f32>> {
        Err(DetectError::Backend("interpreter invoke failed".into()))
    }
}

struct WrongShape;

impl Inference for WrongShape {
    fn infer(&mut self, _input: Array4<f32>) -> beltsight_detect::Result<ArrayD<f32>> {
        Ok(ArrayD::zeros(IxDyn(&[1, 84, 10])))
    }
}

fn engine<I: Inference>(backend: I) -> DetectionEngine<I> {
    let pp = Preprocessor::new(32, 32, TensorLayout::Nchw).expect("preprocessor");
    DetectionEngine::new(backend, pp, BoxDecoder::new(1))
}

fn frame() -> Frame {
    Frame::filled(640, 480, ChannelOrder::Bgr, 90, Duration::ZERO)
}

#[test]
fn single_object_end_to_end() -> anyhow::Result<()> {
    let mut eng = engine(Scripted::new(&[[0.5, 0.5, 0.3, 0.3, 0.9]]));
    let dets = eng.detect(&frame(), &DetectParams::default())?;
    assert_eq!(dets.len(), 1);
    let d = dets[0];
    assert!((d.x1 - 224.0).abs() <= 1.0 && (d.y1 - 168.0).abs() <= 1.0);
    assert!((d.x2 - 416.0).abs() <= 1.0 && (d.y2 - 312.0).abs() <= 1.0);
    assert_eq!((d.confidence, d.class_id), (0.9, 0));
    assert_eq!(eng.backend_mut().calls, 1);
    Ok(())
}

#[test]
fn overlapping_pair_collapses_to_the_stronger() -> anyhow::Result<()> {
    // same centre, first box 80% of the second's height → IoU 0.8
    let mut eng = engine(Scripted::new(&[
        [0.5, 0.5, 0.25, 0.25, 0.6],
        [0.5, 0.5, 0.25, 0.3125, 0.9],
    ]));
    let params = DetectParams { nms: 0.4, ..DetectParams::default() };
    let dets = eng.detect(&frame(), &params)?;
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].confidence, 0.9);
    Ok(())
}

#[test]
fn nothing_above_threshold_is_empty_not_error() -> anyhow::Result<()> {
    let mut eng = engine(Scripted::new(&[[0.5, 0.5, 0.3, 0.3, 0.2], [0.1, 0.1, 0.1, 0.1, 0.49]]));
    let dets = eng.detect(&frame(), &DetectParams::default())?;
    assert!(dets.is_empty());
    Ok(())
}

#[test]
fn size_roi_and_cap_filters() -> anyhow::Result<()> {
    let mut anchors = vec![
        [0.05, 0.05, 0.1, 0.1, 0.95],  // outside the ROI
        [0.5, 0.5, 0.01, 0.01, 0.95],  // 6×5 px, too small
    ];
    // twelve well separated boxes inside the ROI
    for i in 0..12 {
        anchors.push([0.2 + i as f32 * 0.05, 0.5, 0.02, 0.1, 0.5 + i as f32 * 0.01]);
    }
    let mut eng = engine(Scripted::new(&anchors));
    let params = DetectParams {
        min_box_size: 10.0,
        max_detections: 10,
        roi: Some(Roi::new(0.1, 0.1, 0.9, 0.9)?),
        ..DetectParams::default()
    };
    let dets: Vec<Detection> = eng.detect(&frame(), &params)?;
    assert_eq!(dets.len(), 10);
    assert!(dets.iter().all(|d| d.confidence < 0.95));
    assert!(dets.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    Ok(())
}

#[test]
fn backend_failure_is_loud() {
    let mut eng = engine(Failing);
    let err = eng.detect(&frame(), &DetectParams::default()).unwrap_err();
    assert!(matches!(err, DetectError::Backend(_)));
}

#[test]
fn mismatched_output_shape_is_loud() {
    let mut eng = engine(WrongShape);
    let err = eng.detect(&frame(), &DetectParams::default()).unwrap_err();
    assert!(matches!(err, DetectError::OutputShape { expected_rows: 5, .. }));
}

#[cfg(feature = "tract")]
#[test]
#[ignore]
fn yolo_smoke() -> anyhow::Result<()> {
    use beltsight_detect::TractBackend;

    let manifest = std::env::var("CARGO_MANIFEST_DIR")?;
    let default = format!("{}/../../models/best.onnx", manifest);
    let model = std::env::var("YOLO_MODEL").unwrap_or(default);
    let backend = TractBackend::new(std::path::Path::new(&model), [1, 3, 640, 640])?;
    let pp = Preprocessor::new(640, 640, TensorLayout::Nchw)?;
    let mut eng = DetectionEngine::new(backend, pp, BoxDecoder::new(1));

    // Blank 640x480 frame → no detections
    let out = eng.detect(&Frame::filled(640, 480, ChannelOrder::Rgb, 0, Duration::ZERO), &DetectParams::default())?;
    assert!(out.is_empty());
    Ok(())
}
