// beltsight-detect/src/backends/tract.rs
//
// Pure-Rust back-end: no C deps, builds on the Pi as-is.
// Tract ships its own ndarray major, so tensors cross the boundary as
// shape + contiguous slice rather than as array types.

use crate::{DetectError, Inference, Result};
use ndarray::{Array4, ArrayD, IxDyn};
use std::path::Path;
use tract_onnx::prelude::*;

/// Tract-powered YOLO detector head.
pub struct TractBackend {
    model: RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_shape: [usize; 4],
}

impl TractBackend {
    /// Load and optimize the ONNX model for a fixed `input_shape`
    /// (e.g. `[1, 3, 640, 640]`).
    pub fn new(model_path: &Path, input_shape: [usize; 4]) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(model_path)?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(
                input_shape[0], input_shape[1], input_shape[2], input_shape[3]
            )))?
            .into_optimized()?
            .into_runnable()?;
        log::info!("loaded {} with tract, input {:?}", model_path.display(), input_shape);

        Ok(Self { model, input_shape })
    }
}

impl Inference for TractBackend {
    fn infer(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        if input.shape() != self.input_shape {
            return Err(DetectError::InputShape {
                expected: self.input_shape.to_vec(),
                got: input.shape().to_vec(),
            });
        }
        let input = input.as_standard_layout();
        let data = input
            .as_slice()
            .ok_or_else(|| DetectError::Backend("input tensor is not contiguous".into()))?;

        let tensor = Tensor::from_shape(&self.input_shape, data)?;
        let outputs = self.model.run(tvec![tensor.into()])?;
        let view = outputs
            .first()
            .ok_or_else(|| DetectError::Backend("model produced no outputs".into()))?
            .to_array_view::<f32>()?;

        let shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();
        ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|e| DetectError::Backend(e.to_string()))
    }
}
