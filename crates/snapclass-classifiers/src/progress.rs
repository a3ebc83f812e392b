//! Load progress events and sinks

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;

/// Events emitted while a model is being loaded
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadEvent {
    /// Load call started
    Started { location: String, total_attempts: u32 },

    /// A new attempt began (1-based)
    Attempt { attempt: u32, total: u32 },

    /// Artifact transfer progress, 0.0-1.0
    Progress { fraction: f32 },

    /// Attempt failed; the loader waits before the next one
    Retrying {
        attempt: u32,
        #[serde(serialize_with = "serialize_millis")]
        delay: Duration,
        cause: String,
    },

    /// Model is ready
    Loaded { attempts: u32 },

    /// Retry budget exhausted
    Failed { attempts: u32, cause: String },
}

fn serialize_millis<S: serde::Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(delay.as_millis() as u64)
}

impl LoadEvent {
    /// Human-readable status line for progress displays
    pub fn message(&self) -> String {
        match self {
            Self::Started { location, .. } => format!("Starting model load from {}", location),
            Self::Attempt { attempt, total } => {
                format!("Loading model (attempt {}/{})...", attempt, total)
            }
            Self::Progress { fraction } => format!("Loading model: {:.1}%", fraction * 100.0),
            Self::Retrying { attempt, delay, cause } => format!(
                "Attempt {} failed ({}), retrying in {} ms",
                attempt,
                cause,
                delay.as_millis()
            ),
            Self::Loaded { attempts } => format!("Model loaded after {} attempt(s)", attempts),
            Self::Failed { attempts, cause } => format!(
                "Could not load the model after {} attempt(s): {}",
                attempts, cause
            ),
        }
    }
}

/// Receiver of load progress
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: LoadEvent);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: LoadEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(LoadEvent) + Send + Sync,
{
    fn emit(&self, event: LoadEvent) {
        self(event)
    }
}

/// Event bus for broadcasting load events to any number of subscribers
pub struct EventBus {
    sender: broadcast::Sender<LoadEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LoadEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LoadEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressSink for EventBus {
    fn emit(&self, event: LoadEvent) {
        self.publish(event);
    }
}
