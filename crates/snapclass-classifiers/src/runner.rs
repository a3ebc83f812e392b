//! Single-image inference

use crate::model::ModelHandle;
use candle_core::{DType, Tensor};
use snapclass_core::{Error, Result};
use std::time::Instant;

/// Runs a loaded model on one preprocessed image
///
/// Failures are returned immediately and never retried; they point at a
/// missing model or a shape bug rather than a transient condition.
pub struct InferenceRunner;

impl InferenceRunner {
    /// Return the handle, or an inference error if no model is loaded yet
    pub fn ensure_ready(handle: Option<&ModelHandle>) -> Result<&ModelHandle> {
        handle.ok_or_else(|| Error::inference("model not loaded"))
    }

    /// Run `input` (`[1, H, W, C]`) through the model and return its
    /// flattened probability vector
    pub fn run(handle: Option<&ModelHandle>, input: &Tensor) -> Result<Vec<f32>> {
        let handle = Self::ensure_ready(handle)?;
        let declared = handle.input_shape();
        let dims = input.dims();

        if !declared.accepts(dims) || dims[0] != 1 {
            return Err(Error::inference(format!(
                "Input shape {:?} does not match model input {} with a batch of one",
                dims, declared
            )));
        }

        let start = Instant::now();
        let output = handle.predict(input)?;
        let probabilities = output
            .flatten_all()
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::inference(format!("Failed to read model output: {}", e)))?;

        let elapsed = start.elapsed();
        metrics::histogram!("snapclass_inference_latency_us").record(elapsed.as_micros() as f64);
        tracing::debug!(
            "Inference on '{}' produced {} values in {:?}",
            handle.name(),
            probabilities.len(),
            elapsed
        );

        if probabilities.len() != handle.num_classes() {
            return Err(Error::inference(format!(
                "Model produced {} values, expected {}",
                probabilities.len(),
                handle.num_classes()
            )));
        }

        Ok(probabilities)
    }
}
