//! Mock fetchers, builders and models for testing
//!
//! Provides configurable implementations of the loader seams so retry,
//! warm-up and session behaviour can be tested without real artifacts.

#![allow(dead_code)]

use async_trait::async_trait;
use candle_core::{Device, Tensor};
use parking_lot::Mutex;
use snapclass_classifiers::{
    ArtifactFetcher, InferenceModel, LoadEvent, ModelArtifact, ModelBuilder, ModelLocation,
    ModelManifest, ProgressSink,
};
use snapclass_core::{Error, InputShape, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

/// Probabilities used by the six-class mocks
pub const SIX_CLASS: [f32; 6] = [0.2, 0.1, 0.5, 0.1, 0.05, 0.05];

/// Manifest with the given NHWC input and a single dense head
pub fn manifest(input_shape: [Option<usize>; 4], classes: usize) -> ModelManifest {
    let json = serde_json::json!({
        "name": "mock-model",
        "version": "1",
        "input_shape": input_shape,
        "layers": [
            {"name": "flat", "type": "flatten"},
            {"name": "head", "type": "dense", "units": classes, "activation": "softmax"}
        ]
    });
    serde_json::from_value(json).unwrap()
}

pub fn location() -> ModelLocation {
    "https://models.example.com/v4/model.json".parse().unwrap()
}

/// Records every event it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LoadEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LoadEvent> {
        self.events.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, LoadEvent::Attempt { .. }))
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: LoadEvent) {
        self.events.lock().push(event);
    }
}

/// Fetcher whose first `unreachable` probes fail
pub struct MockFetcher {
    manifest: ModelManifest,
    unreachable: u32,
    fetch_error: Option<fn() -> Error>,
    probes: AtomicU32,
    fetches: AtomicU32,
}

impl MockFetcher {
    pub fn new(manifest: ModelManifest) -> Self {
        Self {
            manifest,
            unreachable: 0,
            fetch_error: None,
            probes: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }

    /// Fail this many probes before succeeding
    pub fn with_unreachable(mut self, probes: u32) -> Self {
        self.unreachable = probes;
        self
    }

    /// Every transfer fails with the error `make` returns
    pub fn with_fetch_error(mut self, make: fn() -> Error) -> Self {
        self.fetch_error = Some(make);
        self
    }

    /// Never succeed
    pub fn always_unreachable(self) -> Self {
        self.with_unreachable(u32::MAX)
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for MockFetcher {
    async fn probe(&self, _location: &ModelLocation) -> bool {
        let seen = self.probes.fetch_add(1, Ordering::SeqCst);
        seen >= self.unreachable
    }

    async fn fetch(
        &self,
        _location: &ModelLocation,
        sink: &dyn ProgressSink,
    ) -> Result<ModelArtifact> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = self.fetch_error {
            return Err(make());
        }
        sink.emit(LoadEvent::Progress { fraction: 0.5 });
        sink.emit(LoadEvent::Progress { fraction: 1.0 });
        Ok(ModelArtifact::new(self.manifest.clone(), Vec::new()))
    }
}

/// Blocks a prediction until the test lets it go
pub struct Gate {
    armed: AtomicBool,
    entered: Barrier,
    release: Barrier,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            armed: AtomicBool::new(false),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        })
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Wait until a prediction is inside the model
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    pub fn release(&self) {
        self.release.wait();
    }

    fn pass(&self) {
        if self.armed.load(Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
    }
}

/// Model returning fixed probabilities for every batch row
pub struct MockModel {
    input_shape: InputShape,
    probabilities: Vec<f32>,
    output_len: usize,
    gate: Option<Arc<Gate>>,
    calls: Arc<AtomicU32>,
}

impl InferenceModel for MockModel {
    fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.probabilities.len()
    }

    fn predict(&self, input: &Tensor) -> Result<Tensor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass();
        }

        let batch = input.dims()[0];
        let values: Vec<f32> = self
            .probabilities
            .iter()
            .copied()
            .cycle()
            .take(batch * self.output_len)
            .collect();
        Tensor::from_vec(values, (batch, self.output_len), &Device::Cpu)
            .map_err(|e| Error::inference(e.to_string()))
    }
}

/// Builder producing [`MockModel`]s and remembering what it was given
pub struct MockBuilder {
    probabilities: Vec<f32>,
    output_len: Option<usize>,
    fail: bool,
    build_time: Duration,
    gate: Option<Arc<Gate>>,
    calls: Arc<AtomicU32>,
    built: Mutex<Vec<ModelManifest>>,
}

impl MockBuilder {
    pub fn new(probabilities: &[f32]) -> Self {
        Self {
            probabilities: probabilities.to_vec(),
            output_len: None,
            fail: false,
            build_time: Duration::ZERO,
            gate: None,
            calls: Arc::new(AtomicU32::new(0)),
            built: Mutex::new(Vec::new()),
        }
    }

    /// Models emit this many values instead of one per class
    pub fn with_output_len(mut self, len: usize) -> Self {
        self.output_len = Some(len);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Block the building thread this long, like a large weights parse
    pub fn with_build_time(mut self, build_time: Duration) -> Self {
        self.build_time = build_time;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Forward passes across every model built so far
    pub fn predict_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn built(&self) -> Vec<ModelManifest> {
        self.built.lock().clone()
    }
}

impl ModelBuilder for MockBuilder {
    fn build(&self, artifact: ModelArtifact) -> Result<Box<dyn InferenceModel>> {
        self.built.lock().push(artifact.manifest.clone());
        if !self.build_time.is_zero() {
            std::thread::sleep(self.build_time);
        }
        if self.fail {
            return Err(Error::config("corrupt weights"));
        }

        Ok(Box::new(MockModel {
            input_shape: artifact.manifest.input_shape()?,
            probabilities: self.probabilities.clone(),
            output_len: self.output_len.unwrap_or(self.probabilities.len()),
            gate: self.gate.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }
}
