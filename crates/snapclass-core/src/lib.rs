//! SnapClass Core
//!
//! Core types and error handling shared across SnapClass components.
//!
//! This crate provides:
//! - The error taxonomy for loading, preprocessing and inference
//! - Prediction and input-shape value types
//! - Preprocessing enums shared by configuration and the image codec

pub mod error;
pub mod types;

pub use error::{AttemptError, Error, ModelLoadError, Result};
pub use types::{InputShape, Normalization, PredictionEntry, ResizeFilter};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{AttemptError, Error, ModelLoadError, Result};
    pub use crate::types::{InputShape, Normalization, PredictionEntry, ResizeFilter};
}
