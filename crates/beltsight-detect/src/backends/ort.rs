// beltsight-detect/src/backends/ort.rs
//
// ONNX Runtime back-end (`--features ort`). Downloads the runtime binaries
// at build time.

use crate::{Inference, Result};
use ndarray::{Array4, ArrayD};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;

pub struct OrtBackend {
    session: Session,
}

impl OrtBackend {
    /// `threads == 0` picks the number of physical cores, capped at 4.
    pub fn new(model_path: &Path, threads: usize) -> Result<Self> {
        let threads = intra_threads(threads);
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(model_path)?;
        log::info!("loaded {} with onnxruntime, {threads} intra-op threads", model_path.display());
        Ok(Self { session })
    }
}

fn intra_threads(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get_physical().clamp(1, 4)
    } else {
        requested
    }
}

impl Inference for OrtBackend {
    fn infer(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        let tensor = Tensor::from_array(input)?;
        let outputs = self.session.run(ort::inputs![tensor]?)?;
        let view = outputs[0].try_extract_tensor::<f32>()?;
        Ok(view.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::intra_threads;

    #[test]
    fn thread_count() {
        assert_eq!(intra_threads(3), 3);
        assert!((1..=4).contains(&intra_threads(0)));
    }
}
