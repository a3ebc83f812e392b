//! Model traits and the loaded model handle

use crate::manifest::ModelManifest;
use bytes::Bytes;
use candle_core::{Device, Tensor};
use snapclass_core::{InputShape, Result};
use std::fmt;
use std::sync::Arc;

/// Trait for anything that can run a forward pass on an NHWC image batch
pub trait InferenceModel: Send + Sync {
    /// Declared input shape
    fn input_shape(&self) -> InputShape;

    /// Length of the output probability vector
    fn num_classes(&self) -> usize;

    /// Run a forward pass; `input` is `[batch, H, W, C]`, output `[batch, N]`
    fn predict(&self, input: &Tensor) -> Result<Tensor>;

    /// Device the weights live on
    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// Turns fetched artifacts into runnable models
pub trait ModelBuilder: Send + Sync {
    fn build(&self, artifact: ModelArtifact) -> Result<Box<dyn InferenceModel>>;
}

/// Raw model artifact: manifest plus serialized weights
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub manifest: ModelManifest,
    pub weights: Bytes,
}

impl ModelArtifact {
    pub fn new(manifest: ModelManifest, weights: impl Into<Bytes>) -> Self {
        Self {
            manifest,
            weights: weights.into(),
        }
    }
}

/// Opaque, cheaply clonable reference to a successfully loaded model
///
/// Only the model loader creates handles, and a handle is never mutated
/// after creation.
#[derive(Clone)]
pub struct ModelHandle {
    name: Arc<str>,
    model: Arc<dyn InferenceModel>,
}

impl ModelHandle {
    pub(crate) fn new(name: impl Into<Arc<str>>, model: Box<dyn InferenceModel>) -> Self {
        Self {
            name: name.into(),
            model: Arc::from(model),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_shape(&self) -> InputShape {
        self.model.input_shape()
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    pub fn device(&self) -> Device {
        self.model.device()
    }

    /// Forward pass on the underlying model
    pub fn predict(&self, input: &Tensor) -> Result<Tensor> {
        self.model.predict(input)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("input_shape", &self.input_shape())
            .field("num_classes", &self.num_classes())
            .finish()
    }
}
