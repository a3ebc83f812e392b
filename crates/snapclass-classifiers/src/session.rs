//! Classifier session: one model, one label table, one prediction at a time

use crate::codec::ImageCodec;
use crate::config::ClassifierConfig;
use crate::fetch::{DefaultFetcher, ModelLocation};
use crate::labels::LabelTable;
use crate::layers::LayersModelBuilder;
use crate::loader::ModelLoader;
use crate::model::ModelHandle;
use crate::progress::ProgressSink;
use crate::ranker::ResultRanker;
use crate::runner::InferenceRunner;
use image::DynamicImage;
use parking_lot::RwLock;
use snapclass_core::{Error, PredictionEntry, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Owns a lazily loaded model and the state around it
///
/// The model handle is published once through a [`OnceCell`], so readers
/// either see nothing or a fully built handle. Predictions are serialized by
/// a busy flag: a call that arrives while another is running fails with
/// [`Error::Busy`] instead of queueing.
pub struct ClassifierSession {
    loader: ModelLoader,
    location: ModelLocation,
    handle: OnceCell<ModelHandle>,
    codec: ImageCodec,
    labels: LabelTable,
    top_k: usize,
    busy: AtomicBool,
    last: RwLock<Option<Vec<PredictionEntry>>>,
}

/// Clears the busy flag when a prediction ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| Error::Busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ClassifierSession {
    pub fn new(
        loader: ModelLoader,
        location: ModelLocation,
        codec: ImageCodec,
        labels: LabelTable,
    ) -> Self {
        Self {
            loader,
            location,
            handle: OnceCell::new(),
            codec,
            labels,
            top_k: 6,
            busy: AtomicBool::new(false),
            last: RwLock::new(None),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Build a session with the default fetcher and the candle layers builder
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        config.validate()?;

        let labels = match &config.labels {
            Some(path) => LabelTable::from_file(path)?,
            None => LabelTable::empty(),
        };

        let loader = ModelLoader::new(
            Arc::new(DefaultFetcher::new()),
            Arc::new(LayersModelBuilder::new(config.model.device)),
        )
        .with_retry_policy(config.retry_policy())
        .with_warm_up(config.model.warm_up);

        let codec = ImageCodec::new(config.preprocess.clone())?;

        Ok(Self::new(loader, config.location()?, codec, labels).with_top_k(config.top_k))
    }

    /// Load the model if it isn't loaded yet and return its handle
    ///
    /// Concurrent callers share one load. A failed load leaves the session
    /// empty so a later call can try again.
    pub async fn load(&self, sink: &dyn ProgressSink) -> Result<ModelHandle> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let handle = self.loader.load(&self.location, sink).await?;
                self.codec
                    .config()
                    .validate_against(&handle.input_shape())?;

                if !self.labels.is_empty() && self.labels.len() != handle.num_classes() {
                    warn!(
                        "Label table has {} entries but model '{}' has {} classes",
                        self.labels.len(),
                        handle.name(),
                        handle.num_classes()
                    );
                }

                info!("Session ready with model '{}'", handle.name());
                Ok::<_, Error>(handle)
            })
            .await?;

        Ok(handle.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.handle.initialized()
    }

    pub fn handle(&self) -> Option<&ModelHandle> {
        self.handle.get()
    }

    pub fn location(&self) -> &ModelLocation {
        &self.location
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Classify one image and return its top-K predictions
    ///
    /// On failure the previous predictions stay as they were.
    pub fn predict(&self, image: &DynamicImage) -> Result<Vec<PredictionEntry>> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let handle = InferenceRunner::ensure_ready(self.handle.get())?;

        let input = self.codec.preprocess(image)?;
        let probabilities = InferenceRunner::run(Some(handle), &input)?;
        let predictions = ResultRanker::rank(&probabilities, &self.labels, self.top_k);

        *self.last.write() = Some(predictions.clone());
        metrics::counter!("snapclass_predictions_total").increment(1);
        Ok(predictions)
    }

    /// Predictions from the most recent successful call
    pub fn last_predictions(&self) -> Option<Vec<PredictionEntry>> {
        self.last.read().clone()
    }
}
