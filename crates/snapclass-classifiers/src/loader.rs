//! Model loading with bounded retries
//!
//! Every attempt probes the artifact, transfers it, rebuilds a fixed batch
//! dimension as a flexible one, deserializes the model and optionally runs a
//! warm-up inference. Failed attempts are retried after an async delay until
//! the retry budget is spent.

use crate::fetch::{ArtifactFetcher, ModelLocation};
use crate::model::{ModelArtifact, ModelBuilder, ModelHandle};
use crate::progress::{LoadEvent, ProgressSink};
use candle_core::{DType, Tensor};
use snapclass_core::{AttemptError, Error, ModelLoadError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("Retry policy needs at least one attempt"));
        }
        Ok(())
    }
}

/// Position of a load call in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

/// Retry bookkeeping for a single load call
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    state: LoadState,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            state: LoadState::Idle,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Move into `Attempting`, returning the 1-based attempt number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.state = LoadState::Attempting {
            attempt: self.attempt,
        };
        self.attempt
    }

    pub fn succeed(&mut self) {
        self.state = LoadState::Succeeded {
            attempts: self.attempt,
        };
    }

    /// Record a failed attempt; returns the delay before the next one, or
    /// `None` when the budget is exhausted
    pub fn fail(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            self.state = LoadState::Failed {
                attempts: self.attempt,
            };
            None
        } else {
            self.state = LoadState::Retrying {
                attempt: self.attempt,
                delay: self.policy.delay,
            };
            Some(self.policy.delay)
        }
    }
}

/// Loads models through a fetcher and a builder
#[derive(Clone)]
pub struct ModelLoader {
    fetcher: Arc<dyn ArtifactFetcher>,
    builder: Arc<dyn ModelBuilder>,
    policy: RetryPolicy,
    warm_up: bool,
}

impl ModelLoader {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, builder: Arc<dyn ModelBuilder>) -> Self {
        Self {
            fetcher,
            builder,
            policy: RetryPolicy::default(),
            warm_up: true,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable the warm-up inference after a successful build
    pub fn with_warm_up(mut self, enable: bool) -> Self {
        self.warm_up = enable;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Load a model, retrying up to the policy's attempt budget
    pub async fn load(
        &self,
        location: &ModelLocation,
        sink: &dyn ProgressSink,
    ) -> Result<ModelHandle> {
        self.policy.validate()?;

        let total = self.policy.max_attempts;
        let mut retry = RetryState::new(self.policy);
        sink.emit(LoadEvent::Started {
            location: location.to_string(),
            total_attempts: total,
        });

        loop {
            let attempt = retry.begin_attempt();
            metrics::counter!("snapclass_load_attempts_total").increment(1);
            sink.emit(LoadEvent::Attempt { attempt, total });

            let cause = match self.attempt(location, sink).await {
                Ok(handle) => {
                    retry.succeed();
                    info!(
                        "Model '{}' loaded from {} (attempt {}/{})",
                        handle.name(),
                        location,
                        attempt,
                        total
                    );
                    sink.emit(LoadEvent::Loaded { attempts: attempt });
                    return Ok(handle);
                }
                Err(cause) => cause,
            };

            warn!("Attempt {} failed: {}", attempt, cause);
            metrics::counter!("snapclass_load_failures_total", "cause" => cause.kind()).increment(1);

            match retry.fail() {
                Some(delay) => {
                    sink.emit(LoadEvent::Retrying {
                        attempt,
                        delay,
                        cause: cause.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                None => {
                    sink.emit(LoadEvent::Failed {
                        attempts: attempt,
                        cause: cause.to_string(),
                    });
                    return Err(ModelLoadError::new(attempt, cause).into());
                }
            }
        }
    }

    /// One probe → fetch → fixup → build → warm-up pass
    async fn attempt(
        &self,
        location: &ModelLocation,
        sink: &dyn ProgressSink,
    ) -> std::result::Result<ModelHandle, AttemptError> {
        if !self.fetcher.probe(location).await {
            return Err(AttemptError::NotFound(location.to_string()));
        }

        let mut artifact = self
            .fetcher
            .fetch(location, sink)
            .await
            .map_err(|e| match e {
                // manifest problems; transfer failures use other variants
                Error::Config(msg) => AttemptError::Deserialize(msg),
                other => AttemptError::Fetch(other.to_string()),
            })?;

        ensure_flexible_batch(&mut artifact)?;

        let name = if artifact.manifest.name.is_empty() {
            location.to_string()
        } else {
            artifact.manifest.name.clone()
        };

        let builder = Arc::clone(&self.builder);
        let run_warm_up = self.warm_up;
        let task = tokio::task::spawn_blocking(move || {
            build_and_warm_up(builder, name, artifact, run_warm_up)
        });
        task.await
            .map_err(|e| AttemptError::Deserialize(format!("Model build task failed: {}", e)))?
    }
}

/// Deserialize the model and optionally run it once; CPU-bound
fn build_and_warm_up(
    builder: Arc<dyn ModelBuilder>,
    name: String,
    artifact: ModelArtifact,
    run_warm_up: bool,
) -> std::result::Result<ModelHandle, AttemptError> {
    let model = builder
        .build(artifact)
        .map_err(|e| AttemptError::Deserialize(e.to_string()))?;
    let handle = ModelHandle::new(name, model);

    if run_warm_up {
        warm_up(&handle).map_err(|e| AttemptError::WarmUp(e.to_string()))?;
    }

    Ok(handle)
}

/// Replace a pinned batch dimension with a flexible one, keeping every layer
fn ensure_flexible_batch(artifact: &mut ModelArtifact) -> std::result::Result<(), AttemptError> {
    if !artifact.manifest.has_fixed_batch() {
        return Ok(());
    }

    let rebuilt = artifact
        .manifest
        .with_flexible_batch()
        .map_err(|e| AttemptError::ShapeReconstruction(e.to_string()))?;
    info!(
        "Rebuilt model input {:?} -> {:?} with a flexible batch dimension",
        artifact.manifest.input_shape, rebuilt.input_shape
    );
    artifact.manifest = rebuilt;
    Ok(())
}

/// Throwaway inference on zeros so lazy initialization happens now
fn warm_up(handle: &ModelHandle) -> Result<()> {
    let dims = handle.input_shape().single_batch_dims();
    let input = Tensor::zeros(dims.to_vec(), DType::F32, &handle.device())
        .map_err(|e| Error::inference(format!("Failed to build warm-up input: {}", e)))?;

    let output = handle.predict(&input)?;
    let produced = output.elem_count();
    if produced != handle.num_classes() {
        return Err(Error::inference(format!(
            "Warm-up produced {} values, expected {}",
            produced,
            handle.num_classes()
        )));
    }

    debug!("Warm-up inference on {:?} succeeded", dims);
    Ok(())
}
