#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::classify::backend::SpotClassifier;
use crate::Occupancy;

/// Tract-based backend for ONNX binary classifiers.
///
/// The model takes a `[1, input_len]` f32 tensor and its first output carries the
/// predicted label (scikit-learn exports emit an i64 label tensor). Model loading is
/// the only file access.
pub struct TractClassifier {
    model: TypedRunnableModel<TypedModel>,
    input_len: usize,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_len: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, input_len)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_len })
    }

    fn build_input(&self, features: &[f32]) -> Result<Tensor> {
        if features.len() != self.input_len {
            return Err(anyhow!(
                "expected {} features, received {}",
                self.input_len,
                features.len()
            ));
        }
        let input = tract_ndarray::Array2::from_shape_vec((1, self.input_len), features.to_vec())
            .context("feature vector does not fit model input")?;
        Ok(input.into_tensor())
    }

    fn extract_label(&self, outputs: TVec<TValue>) -> Result<i64> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        if let Ok(view) = output.to_array_view::<i64>() {
            return view.iter().next().copied().ok_or_else(|| anyhow!("empty label tensor"));
        }
        if let Ok(view) = output.to_array_view::<i32>() {
            return view
                .iter()
                .next()
                .map(|&v| v as i64)
                .ok_or_else(|| anyhow!("empty label tensor"));
        }
        let view = output
            .to_array_view::<f32>()
            .context("model label tensor was not i64, i32 or f32")?;
        view.iter()
            .next()
            .map(|v| v.round() as i64)
            .ok_or_else(|| anyhow!("empty label tensor"))
    }
}

impl SpotClassifier for TractClassifier {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn input_len(&self) -> Option<usize> {
        Some(self.input_len)
    }

    fn predict(&mut self, features: &[f32]) -> Result<Occupancy> {
        let input = self.build_input(features)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Occupancy::from_label(self.extract_label(outputs)?)
    }
}
