//! Prediction response records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One output line: either a prediction or the reason there is none
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Id of the request this answers
    pub id: String,

    /// Model output; non-finite values serialize as `null`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<f32>>,

    /// Error message when the prediction failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Time spent scaling and running the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_us: Option<u64>,

    pub predicted_at: DateTime<Utc>,
}

impl PredictionResponse {
    /// Successful prediction
    pub fn success(id: String, output: Vec<f32>) -> Self {
        Self {
            id,
            output: Some(output),
            error: None,
            latency_us: None,
            predicted_at: Utc::now(),
        }
    }

    /// Failed prediction
    pub fn failure(id: String, error: impl ToString) -> Self {
        Self {
            id,
            output: None,
            error: Some(error.to_string()),
            latency_us: None,
            predicted_at: Utc::now(),
        }
    }

    pub fn with_latency_us(mut self, latency_us: u64) -> Self {
        self.latency_us = Some(latency_us);
        self
    }
}
