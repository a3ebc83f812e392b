//! SnapClass command-line classifier
//!
//! Loads a model with progress reporting, classifies image files and prints
//! ranked predictions as text or JSON.

pub mod cli;
pub mod output;
pub mod settings;
