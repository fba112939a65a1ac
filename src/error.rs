//! Error types for diffuwords-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Caller passed tensors that violate the model's shape contract.
    #[error("shape: {0}")]
    Shape(String),

    /// Requested an operation the model does not provide (e.g. an unknown logits mode).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Model weight loading error.
    #[error("weight loading: {0}")]
    WeightLoad(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// HuggingFace Hub error.
    #[error("hf-hub: {0}")]
    HfHub(String),
}

impl From<hf_hub::api::sync::ApiError> for Error {
    fn from(error: hf_hub::api::sync::ApiError) -> Self {
        Error::HfHub(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_implemented_message_names_mode() {
        let err = Error::NotImplemented("logits_mode 3".into());
        assert_eq!(err.to_string(), "not implemented: logits_mode 3");
    }

    #[test]
    fn candle_errors_convert() {
        let inner = candle_core::Error::Msg("boom".into());
        let err: Error = inner.into();
        assert!(matches!(err, Error::Candle(_)));
    }
}
