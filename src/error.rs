use thiserror::Error;

/// Failure of a single call to an inference endpoint.
///
/// Transport failures, non-success statuses and malformed bodies are kept
/// apart here for logging; callers fold them into one "send failed"
/// condition via [`DispatchError::SendFailed`].
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation '{0}' not found")]
    NotFound(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("a request is already in flight for conversation '{0}'")]
    Busy(String),

    #[error("send failed: {0}")]
    SendFailed(#[from] InferenceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to read attachment '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("attachment '{0}' is not a supported image type")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} URL '{value}': {source}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("temperature must be within 0.0..=2.0, got {0}")]
    Temperature(f32),

    #[error("progress ceiling must be below 90, got {0}")]
    ProgressCeiling(u8),

    #[error("progress max step must be at least 1")]
    ProgressStep,

    #[error("unknown essay length basis '{0}' (expected 'prose' or 'raw')")]
    LengthBasis(String),

    #[error("unsupported history store type: {0}")]
    HistoryType(String),
}
