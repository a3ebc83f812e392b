//! Error types for SnapClass

/// Result type alias using SnapClass's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for SnapClass operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Model could not be loaded after exhausting every retry
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    /// Inference failed (handle not ready, shape mismatch, engine failure)
    #[error("inference error: {0}")]
    Inference(String),

    /// Bitmap could not be turned into an input tensor
    #[error("preprocess error: {0}")]
    Preprocess(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Another prediction is still running on the same session
    #[error("session is busy with another prediction")]
    Busy,

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new preprocess error
    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came out of the model loader
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::ModelLoad(_))
    }
}

/// Terminal failure of a model load, raised once the retry budget is spent
#[derive(Debug, Clone, thiserror::Error)]
#[error("model load failed after {attempts} attempt(s): {last_cause}")]
pub struct ModelLoadError {
    /// Number of attempts that were made
    pub attempts: u32,

    /// Cause of the final attempt's failure
    pub last_cause: AttemptError,
}

impl ModelLoadError {
    pub fn new(attempts: u32, last_cause: AttemptError) -> Self {
        Self {
            attempts,
            last_cause,
        }
    }
}

/// Why a single load attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// Existence probe says the artifact is not there
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// Artifact exists but could not be transferred
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Manifest or weights could not be turned into a model
    #[error("deserialization failed: {0}")]
    Deserialize(String),

    /// Input shape could not be rebuilt with a flexible batch dimension
    #[error("shape reconstruction failed: {0}")]
    ShapeReconstruction(String),

    /// Warm-up inference failed on the freshly built model
    #[error("warm-up inference failed: {0}")]
    WarmUp(String),
}

impl AttemptError {
    /// Short machine-friendly name, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Fetch(_) => "fetch",
            Self::Deserialize(_) => "deserialize",
            Self::ShapeReconstruction(_) => "shape_reconstruction",
            Self::WarmUp(_) => "warm_up",
        }
    }
}
