//! Error types for loading assets and running predictions

use thiserror::Error;

/// Failure while fetching or decoding the model or the scale table.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request for {location} failed: {source}")]
    Http {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request for {location} returned status {status}")]
    HttpStatus { location: String, status: u16 },

    #[error("invalid asset location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("malformed JSON in {location}: {source}")]
    Json {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid model description: {0}")]
    InvalidModel(String),

    #[error("unsupported layer type {0}")]
    UnsupportedLayer(String),

    #[error("unsupported activation {0}")]
    UnsupportedActivation(String),

    #[error("unsupported weight dtype {dtype} for {name}")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("weight {0} not found in manifest")]
    MissingWeight(String),

    #[error("bad weight data: {0}")]
    WeightData(String),

    #[error("invalid scale table: {0}")]
    InvalidScaleTable(String),

    #[error("scale table has {scaler} entries but the model expects {model} features")]
    FeatureCountMismatch { model: usize, scaler: usize },

    #[error("onnx runtime error: {0}")]
    Onnx(String),
}

/// Failure inside a model's forward pass.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("input has {actual} columns, model expects {expected}")]
    InputShape { expected: usize, actual: usize },

    #[error("inference backend error: {0}")]
    Backend(String),
}

/// Failure of a single prediction call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictError {
    #[error("model is still loading")]
    NotLoaded,

    #[error("model failed to load: {0}")]
    LoadFailed(String),

    #[error("input has {actual} values, scale table has {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("scale table entry {index} is zero")]
    ZeroDivisor { index: usize },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl PredictError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::NotLoaded => "not_loaded",
            PredictError::LoadFailed(_) => "load_failed",
            PredictError::LengthMismatch { .. } => "length_mismatch",
            PredictError::ZeroDivisor { .. } => "zero_divisor",
            PredictError::Model(_) => "model",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PredictError::LengthMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "input has 2 values, scale table has 3");
        assert_eq!(err.kind(), "length_mismatch");

        let err = LoadError::FeatureCountMismatch { model: 4, scaler: 3 };
        assert_eq!(
            err.to_string(),
            "scale table has 3 entries but the model expects 4 features"
        );
    }

    #[test]
    fn test_model_error_converts() {
        let err: PredictError = ModelError::Backend("boom".to_string()).into();
        assert_eq!(err.kind(), "model");
        assert_eq!(err.to_string(), "inference backend error: boom");
    }
}
