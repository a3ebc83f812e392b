//! SnapClass Classifiers
//!
//! Image classification on top of candle.
//!
//! The pipeline has four stages:
//! - Loading: fetch `model.json` plus weights (local, HTTP or Hub) with
//!   bounded retries, progress events and a warm-up pass
//! - Preprocessing: decode-agnostic resize and normalize into `[1, H, W, C]`
//! - Inference: one forward pass on a loaded [`ModelHandle`]
//! - Ranking: top-K predictions with labels
//!
//! [`ClassifierSession`] ties the stages together for applications.

pub mod codec;
pub mod config;
pub mod fetch;
pub mod labels;
pub mod layers;
pub mod loader;
pub mod manifest;
pub mod model;
pub mod progress;
pub mod ranker;
pub mod runner;
pub mod session;

pub use codec::{ImageCodec, PreprocessConfig};
pub use config::{ClassifierConfig, ModelSettings, RetryConfig};
pub use fetch::{ArtifactFetcher, DefaultFetcher, ModelLocation};
pub use labels::LabelTable;
pub use layers::{DeviceType, LayersModel, LayersModelBuilder};
pub use loader::{LoadState, ModelLoader, RetryPolicy, RetryState};
pub use manifest::{Activation, LayerKind, LayerSpec, ModelManifest, Padding};
pub use model::{InferenceModel, ModelArtifact, ModelBuilder, ModelHandle};
pub use progress::{EventBus, LoadEvent, NoopSink, ProgressSink};
pub use ranker::ResultRanker;
pub use runner::InferenceRunner;
pub use session::ClassifierSession;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::codec::{ImageCodec, PreprocessConfig};
    pub use crate::config::ClassifierConfig;
    pub use crate::fetch::ModelLocation;
    pub use crate::labels::LabelTable;
    pub use crate::loader::{ModelLoader, RetryPolicy};
    pub use crate::model::ModelHandle;
    pub use crate::progress::{EventBus, LoadEvent, NoopSink, ProgressSink};
    pub use crate::session::ClassifierSession;
    pub use snapclass_core::prelude::*;
}
