/// Result alias that carries the custom [`FlamesError`] type.
pub type Result<T> = std::result::Result<T, FlamesError>;

/// Common error type for the core crate.
///
/// Only construction and configuration can fail. Runtime degradation (missing
/// browser capabilities, absent memory statistics, repeated cancellation) is
/// absorbed silently by the subsystems and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum FlamesError {
    /// Free-form message for errors without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON configuration or environment description.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// A reveal table whose stage and delay lists differ in length.
    #[error("stage table has {stages} stages but {delays} delays")]
    StageMismatch { stages: usize, delays: usize },
    /// A reveal table that names the same stage twice.
    #[error("stage `{0}` is declared more than once")]
    DuplicateStage(String),
    /// Configuration values outside their accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A host capability could not be queried. The probe always replaces this
    /// with a default value.
    #[error("capability `{0}` is unavailable")]
    CapabilityUnavailable(&'static str),
}

impl FlamesError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}
