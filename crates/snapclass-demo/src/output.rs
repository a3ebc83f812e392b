//! Result rendering for the terminal

use serde::Serialize;
use snapclass_classifiers::{LabelTable, ModelHandle};
use snapclass_core::PredictionEntry;
use std::fmt::Write;

/// Predictions for one image file
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub image: String,
    pub predictions: Vec<PredictionEntry>,
}

impl ImageReport {
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.image);
        for (rank, entry) in self.predictions.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", rank + 1, entry);
        }
        out
    }
}

/// What `inspect` prints about a loaded model
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub location: String,
    pub input_shape: String,
    pub num_classes: usize,
    pub labels: usize,
}

impl ModelSummary {
    pub fn new(handle: &ModelHandle, location: &str, labels: &LabelTable) -> Self {
        Self {
            name: handle.name().to_string(),
            location: location.to_string(),
            input_shape: handle.input_shape().to_string(),
            num_classes: handle.num_classes(),
            labels: labels.len(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "  Model:    {}", self.name);
        let _ = writeln!(out, "  Location: {}", self.location);
        let _ = writeln!(out, "  Input:    {}", self.input_shape);
        let _ = writeln!(out, "  Classes:  {}", self.num_classes);
        let _ = writeln!(out, "  Labels:   {}", self.labels);
        out
    }
}
