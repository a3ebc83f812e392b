//! Candle-backed sequential layers model
//!
//! Builds a feed-forward image classifier from a [`ModelManifest`] and a
//! safetensors blob. Weights use candle's layout: conv kernels are
//! `[out, in, kh, kw]` and dense kernels `[out, in]`, stored as
//! `<layer>.weight` / `<layer>.bias`. Inputs arrive NHWC and are permuted to
//! NCHW before the first layer, so `flatten` follows NCHW order.

use crate::manifest::{Activation, LayerKind, ModelManifest, Padding};
use crate::model::{InferenceModel, ModelArtifact, ModelBuilder};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use snapclass_core::{Error, InputShape, Result};
use std::fmt;
use std::str::FromStr;

/// Device type for inference
///
/// Written as `cpu`, `cuda[:N]` or `metal[:N]` in settings files,
/// environment variables and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceType {
    /// CPU inference (always available)
    #[default]
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize), // GPU index
    /// Metal (Apple Silicon)
    Metal(usize),
}

impl DeviceType {
    /// Create the candle device
    pub fn create(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(idx) => Device::new_cuda(idx)
                .map_err(|e| Error::config(format!("Failed to create CUDA device: {}", e))),
            Self::Metal(idx) => Device::new_metal(idx)
                .map_err(|e| Error::config(format!("Failed to create Metal device: {}", e))),
        }
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| Error::config(format!("Invalid device index in '{}'", s)))?;
                (kind, index)
            }
            None => (s, 0),
        };

        match kind.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(index)),
            "metal" => Ok(Self::Metal(index)),
            other => Err(Error::config(format!(
                "Unknown device '{}' (expected cpu, cuda[:N] or metal[:N])",
                other
            ))),
        }
    }
}

impl TryFrom<String> for DeviceType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DeviceType> for String {
    fn from(device: DeviceType) -> Self {
        device.to_string()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{}", idx),
            Self::Metal(idx) => write!(f, "metal:{}", idx),
        }
    }
}

/// [`ModelBuilder`] producing [`LayersModel`]s
#[derive(Debug, Clone, Default)]
pub struct LayersModelBuilder {
    device: DeviceType,
}

impl LayersModelBuilder {
    pub fn new(device: DeviceType) -> Self {
        Self { device }
    }
}

impl ModelBuilder for LayersModelBuilder {
    fn build(&self, artifact: ModelArtifact) -> Result<Box<dyn InferenceModel>> {
        let device = self.device.create()?;
        let weights = artifact.weights.to_vec();
        let vb = VarBuilder::from_buffered_safetensors(weights, DType::F32, &device)
            .map_err(|e| Error::config(format!("Failed to load weights: {}", e)))?;

        let model = LayersModel::load(&artifact.manifest, vb, device)?;
        tracing::info!(
            "Built model '{}' with {} layers and {} classes",
            artifact.manifest.name,
            model.layers.len(),
            model.num_classes
        );
        Ok(Box::new(model))
    }
}

enum Layer {
    Conv {
        conv: Conv2d,
        activation: Activation,
    },
    MaxPool {
        size: usize,
        stride: usize,
    },
    GlobalAvgPool,
    Flatten,
    Dense {
        linear: Linear,
        activation: Activation,
    },
    Softmax,
}

/// Activation shape while walking the layer list
#[derive(Debug, Clone, Copy)]
enum Shape {
    Spatial { c: usize, h: usize, w: usize },
    Flat(usize),
}

/// Sequential model running on candle
pub struct LayersModel {
    input_shape: InputShape,
    layers: Vec<Layer>,
    num_classes: usize,
    device: Device,
}

impl LayersModel {
    /// Instantiate every layer, checking shapes along the way
    pub fn load(manifest: &ModelManifest, vb: VarBuilder, device: Device) -> Result<Self> {
        let input_shape = manifest.input_shape()?;
        let mut shape = Shape::Spatial {
            c: input_shape.channels,
            h: input_shape.height,
            w: input_shape.width,
        };
        let mut layers = Vec::with_capacity(manifest.layers.len());

        for spec in &manifest.layers {
            let vb = vb.pp(&spec.name);
            let (layer, next) = match (&spec.kind, shape) {
                (
                    LayerKind::Conv2d {
                        filters,
                        kernel_size,
                        strides,
                        padding,
                        activation,
                    },
                    Shape::Spatial { c, h, w },
                ) => {
                    let pad = match padding {
                        Padding::Valid => 0,
                        Padding::Same if kernel_size % 2 == 1 && *strides == 1 => kernel_size / 2,
                        Padding::Same => {
                            return Err(Error::config(format!(
                                "Layer '{}': 'same' padding needs an odd kernel and stride 1",
                                spec.name
                            )))
                        }
                    };
                    let out_h = conv_out(h, *kernel_size, *strides, pad, &spec.name)?;
                    let out_w = conv_out(w, *kernel_size, *strides, pad, &spec.name)?;
                    let cfg = Conv2dConfig {
                        padding: pad,
                        stride: *strides,
                        ..Default::default()
                    };
                    let conv = candle_nn::conv2d(c, *filters, *kernel_size, cfg, vb)
                        .map_err(|e| layer_err(&spec.name, e))?;
                    (
                        Some(Layer::Conv {
                            conv,
                            activation: *activation,
                        }),
                        Shape::Spatial {
                            c: *filters,
                            h: out_h,
                            w: out_w,
                        },
                    )
                }
                (LayerKind::MaxPooling2d { pool_size, strides }, Shape::Spatial { c, h, w }) => {
                    let stride = strides.unwrap_or(*pool_size);
                    let out_h = conv_out(h, *pool_size, stride, 0, &spec.name)?;
                    let out_w = conv_out(w, *pool_size, stride, 0, &spec.name)?;
                    (
                        Some(Layer::MaxPool {
                            size: *pool_size,
                            stride,
                        }),
                        Shape::Spatial {
                            c,
                            h: out_h,
                            w: out_w,
                        },
                    )
                }
                (LayerKind::GlobalAveragePooling2d, Shape::Spatial { c, .. }) => {
                    (Some(Layer::GlobalAvgPool), Shape::Flat(c))
                }
                (LayerKind::Flatten, Shape::Spatial { c, h, w }) => {
                    (Some(Layer::Flatten), Shape::Flat(c * h * w))
                }
                (LayerKind::Flatten, Shape::Flat(n)) => (None, Shape::Flat(n)),
                (LayerKind::Dense { units, activation }, Shape::Flat(n)) => {
                    let linear =
                        candle_nn::linear(n, *units, vb).map_err(|e| layer_err(&spec.name, e))?;
                    (
                        Some(Layer::Dense {
                            linear,
                            activation: *activation,
                        }),
                        Shape::Flat(*units),
                    )
                }
                (LayerKind::Dropout { .. }, shape) => (None, shape),
                (LayerKind::Softmax, Shape::Flat(n)) => (Some(Layer::Softmax), Shape::Flat(n)),
                (kind, shape) => {
                    return Err(Error::config(format!(
                        "Layer '{}' ({:?}) cannot follow activation shape {:?}",
                        spec.name, kind, shape
                    )))
                }
            };

            if let Some(layer) = layer {
                layers.push(layer);
            }
            shape = next;
        }

        let num_classes = match shape {
            Shape::Flat(n) if n > 0 => n,
            other => {
                return Err(Error::config(format!(
                    "Model must end in a flat class vector, ends in {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            input_shape,
            layers,
            num_classes,
            device,
        })
    }

    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = input
            .to_device(&self.device)?
            .to_dtype(DType::F32)?
            .permute((0, 3, 1, 2))?
            .contiguous()?;

        for layer in &self.layers {
            x = match layer {
                Layer::Conv { conv, activation } => activate(&conv.forward(&x)?, *activation)?,
                Layer::MaxPool { size, stride } => x.max_pool2d_with_stride(*size, *stride)?,
                Layer::GlobalAvgPool => x.mean(D::Minus1)?.mean(D::Minus1)?,
                Layer::Flatten => x.flatten_from(1)?,
                Layer::Dense { linear, activation } => activate(&linear.forward(&x)?, *activation)?,
                Layer::Softmax => candle_nn::ops::softmax(&x, D::Minus1)?,
            };
        }

        Ok(x)
    }
}

impl InferenceModel for LayersModel {
    fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: &Tensor) -> Result<Tensor> {
        if !self.input_shape.accepts(input.dims()) {
            return Err(Error::inference(format!(
                "Input shape {:?} does not match model input {}",
                input.dims(),
                self.input_shape
            )));
        }
        self.forward(input)
            .map_err(|e| Error::inference(format!("Model forward pass failed: {}", e)))
    }

    fn device(&self) -> Device {
        self.device.clone()
    }
}

fn activate(x: &Tensor, activation: Activation) -> candle_core::Result<Tensor> {
    match activation {
        Activation::Linear => Ok(x.clone()),
        Activation::Relu => x.relu(),
        Activation::Sigmoid => candle_nn::ops::sigmoid(x),
        Activation::Softmax => candle_nn::ops::softmax(x, D::Minus1),
    }
}

fn conv_out(size: usize, kernel: usize, stride: usize, pad: usize, layer: &str) -> Result<usize> {
    let padded = size + 2 * pad;
    if kernel == 0 || stride == 0 || padded < kernel {
        return Err(Error::config(format!(
            "Layer '{}': window {} with stride {} does not fit input of size {}",
            layer, kernel, stride, size
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

fn layer_err(name: &str, e: candle_core::Error) -> Error {
    Error::config(format!("Failed to load layer '{}': {}", name, e))
}
