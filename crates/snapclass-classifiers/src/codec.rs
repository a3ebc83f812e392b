//! Image preprocessing into model-ready tensors
//!
//! Decoding is not done here: callers hand over an already decoded
//! [`DynamicImage`]. The codec resizes it, converts samples to `f32`,
//! normalizes them and adds a batch dimension, producing an NHWC tensor of
//! shape `[1, height, width, channels]`.

use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use snapclass_core::{Error, InputShape, Normalization, ResizeFilter, Result};

/// Preprocessing parameters; must match what the model was exported with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Target height in pixels
    #[serde(default = "default_side")]
    pub height: u32,

    /// Target width in pixels
    #[serde(default = "default_side")]
    pub width: u32,

    /// Channel count: 1 (luma), 3 (RGB) or 4 (RGBA)
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Sample scaling
    #[serde(default)]
    pub normalization: Normalization,

    /// Resize interpolation
    #[serde(default)]
    pub resize: ResizeFilter,
}

fn default_side() -> u32 {
    224
}

fn default_channels() -> usize {
    3
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            height: default_side(),
            width: default_side(),
            channels: default_channels(),
            normalization: Normalization::default(),
            resize: ResizeFilter::default(),
        }
    }
}

impl PreprocessConfig {
    /// Create a config for the given size with default normalization and filter
    pub fn new(height: u32, width: u32, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
            ..Default::default()
        }
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_resize(mut self, resize: ResizeFilter) -> Self {
        self.resize = resize;
        self
    }

    /// Output dims `[1, H, W, C]`
    pub fn output_dims(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, self.channels]
    }

    /// Reject sizes the codec cannot produce
    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(Error::config(format!(
                "Preprocess size must be non-zero, got {}x{}",
                self.height, self.width
            )));
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(Error::config(format!(
                "Unsupported channel count {} (expected 1, 3 or 4)",
                self.channels
            )));
        }
        Ok(())
    }

    /// Compare against a model's declared input shape
    ///
    /// A mismatch would not crash inference on every model but silently
    /// degrade accuracy, so it is reported as a configuration error.
    pub fn validate_against(&self, shape: &InputShape) -> Result<()> {
        let [_, h, w, c] = self.output_dims();
        if (h, w, c) != (shape.height, shape.width, shape.channels) {
            return Err(Error::config(format!(
                "Preprocess output [1, {}, {}, {}] does not match model input {}",
                h, w, c, shape
            )));
        }
        Ok(())
    }
}

/// Converts decoded bitmaps into normalized NHWC tensors
#[derive(Debug, Clone)]
pub struct ImageCodec {
    config: PreprocessConfig,
}

impl ImageCodec {
    /// Create a codec, validating the configuration
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Resize, convert, normalize and batch a bitmap
    ///
    /// The result always has shape `[1, height, width, channels]` and lives on
    /// the CPU; the runner moves it to the model's device.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<Tensor> {
        let (src_w, src_h) = image.dimensions();
        if src_w == 0 || src_h == 0 {
            return Err(Error::preprocess(format!(
                "Image is not fully available ({}x{})",
                src_w, src_h
            )));
        }

        let samples = self.resized_samples(image);
        let norm = self.config.normalization;
        let data: Vec<f32> = samples.into_iter().map(|s| norm.apply(s)).collect();

        let [n, h, w, c] = self.config.output_dims();
        Tensor::from_vec(data, (n, h, w, c), &Device::Cpu)
            .map_err(|e| Error::preprocess(format!("Failed to build input tensor: {}", e)))
    }

    /// Raw HWC samples after resizing
    fn resized_samples(&self, image: &DynamicImage) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let filter = match self.config.resize {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
        };

        match self.config.channels {
            1 => imageops::resize(&image.to_luma8(), w, h, filter).into_raw(),
            4 => imageops::resize(&image.to_rgba8(), w, h, filter).into_raw(),
            _ => imageops::resize(&image.to_rgb8(), w, h, filter).into_raw(),
        }
    }
}
