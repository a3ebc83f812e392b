//! Core types for SnapClass

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single labeled prediction produced by ranking a probability vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEntry {
    /// Class index in the model's output vector
    pub index: usize,

    /// Display label for the class
    pub label: String,

    /// Probability (0.0-1.0)
    pub probability: f32,
}

impl PredictionEntry {
    /// Create a new prediction entry
    pub fn new(index: usize, label: impl Into<String>, probability: f32) -> Self {
        Self {
            index,
            label: label.into(),
            probability,
        }
    }
}

impl fmt::Display for PredictionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.6}", self.label, self.probability)
    }
}

/// Declared NHWC input shape of a model
///
/// `batch` is `None` when the model accepts any batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub batch: Option<usize>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    /// Shape with a flexible batch dimension
    pub fn flexible(height: usize, width: usize, channels: usize) -> Self {
        Self {
            batch: None,
            height,
            width,
            channels,
        }
    }

    /// Whether the batch dimension is left open
    pub fn has_flexible_batch(&self) -> bool {
        self.batch.is_none()
    }

    /// Concrete dims for a batch of one, used for warm-up inputs
    pub fn single_batch_dims(&self) -> [usize; 4] {
        [1, self.height, self.width, self.channels]
    }

    /// Check a concrete tensor shape against this declaration
    pub fn accepts(&self, dims: &[usize]) -> bool {
        match dims {
            [batch, h, w, c] => {
                let batch_ok = match self.batch {
                    Some(fixed) => *batch == fixed,
                    None => *batch >= 1,
                };
                batch_ok && *h == self.height && *w == self.width && *c == self.channels
            }
            _ => false,
        }
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.batch {
            Some(b) => write!(f, "[{}, {}, {}, {}]", b, self.height, self.width, self.channels),
            None => write!(f, "[?, {}, {}, {}]", self.height, self.width, self.channels),
        }
    }
}

/// How raw 0-255 samples are scaled before inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `x / 255`, range [0, 1]
    #[default]
    UnitRange,
    /// `x / 127.5 - 1`, range [-1, 1]
    SymmetricRange,
}

impl Normalization {
    /// Apply the normalization to a single sample
    #[inline]
    pub fn apply(self, sample: u8) -> f32 {
        let x = sample as f32;
        match self {
            Self::UnitRange => x / 255.0,
            Self::SymmetricRange => x / 127.5 - 1.0,
        }
    }
}

/// Interpolation used when resizing a bitmap to the model input size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    #[default]
    Nearest,
    Bilinear,
}
