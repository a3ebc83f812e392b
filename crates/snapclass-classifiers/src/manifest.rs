//! Model manifest (`model.json`) structures
//!
//! A model artifact is a manifest describing the input shape and an ordered
//! list of layers, plus a safetensors file holding the layer weights.

use serde::{Deserialize, Serialize};
use snapclass_core::{Error, InputShape, Result};

/// Parsed `model.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Model name
    #[serde(default)]
    pub name: String,

    /// Model version
    #[serde(default)]
    pub version: String,

    /// NHWC input shape; a `null` first entry means a flexible batch size
    pub input_shape: Vec<Option<usize>>,

    /// Layers applied in order
    pub layers: Vec<LayerSpec>,

    /// Weights file, relative to the manifest
    #[serde(default = "default_weights_file")]
    pub weights: String,
}

fn default_weights_file() -> String {
    "model.safetensors".to_string()
}

/// A named layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Weight prefix in the safetensors file
    pub name: String,

    #[serde(flatten)]
    pub kind: LayerKind,
}

/// Supported layer types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerKind {
    Conv2d {
        filters: usize,
        kernel_size: usize,
        #[serde(default = "default_stride")]
        strides: usize,
        #[serde(default)]
        padding: Padding,
        #[serde(default)]
        activation: Activation,
    },
    MaxPooling2d {
        pool_size: usize,
        #[serde(default)]
        strides: Option<usize>,
    },
    GlobalAveragePooling2d,
    Flatten,
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
    /// Identity at inference time
    Dropout {
        #[serde(default)]
        rate: f32,
    },
    Softmax,
}

fn default_stride() -> usize {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    Valid,
    Same,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Softmax,
}

impl ModelManifest {
    /// Parse a manifest from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::config(format!("Failed to parse model manifest: {}", e)))
    }

    /// Declared input shape
    pub fn input_shape(&self) -> Result<InputShape> {
        match self.input_shape.as_slice() {
            [batch, Some(h), Some(w), Some(c)] if *h > 0 && *w > 0 && *c > 0 => {
                if *batch == Some(0) {
                    return Err(Error::config("Input batch dimension cannot be 0"));
                }
                Ok(InputShape {
                    batch: *batch,
                    height: *h,
                    width: *w,
                    channels: *c,
                })
            }
            other => Err(Error::config(format!(
                "Input shape must be [batch|null, height, width, channels] with non-zero dims, got {:?}",
                other
            ))),
        }
    }

    /// Whether the batch dimension is pinned to a concrete size
    pub fn has_fixed_batch(&self) -> bool {
        matches!(self.input_shape.first(), Some(Some(_)))
    }

    /// Rebuild the manifest with a flexible batch dimension
    ///
    /// Layers and weights are carried over unchanged; only the leading input
    /// dimension is replaced.
    pub fn with_flexible_batch(&self) -> Result<Self> {
        let shape = self.input_shape()?;
        if self.layers.is_empty() {
            return Err(Error::config("Cannot rebuild a model without layers"));
        }

        Ok(Self {
            input_shape: vec![None, Some(shape.height), Some(shape.width), Some(shape.channels)],
            ..self.clone()
        })
    }
}
