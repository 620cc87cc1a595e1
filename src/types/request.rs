//! Prediction request parsing

use serde::Deserialize;

/// Accepted shapes of one input line
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RequestLine {
    /// `[1.0, 2.0, ...]`
    Bare(Vec<f32>),
    /// `{"id": "...", "input": [...]}`
    Tagged {
        #[serde(default)]
        id: Option<String>,
        #[serde(alias = "features", alias = "inputData")]
        input: Vec<f32>,
    },
}

/// One input vector to score
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    /// Caller-supplied id, or a generated UUID
    pub id: String,
    /// Raw (unscaled) feature values
    pub input: Vec<f32>,
}

impl PredictionRequest {
    pub fn new(id: String, input: Vec<f32>) -> Self {
        Self { id, input }
    }

    /// Parse a JSON line. Lines without an id get a fresh UUID.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let request = match serde_json::from_str::<RequestLine>(line)? {
            RequestLine::Bare(input) => Self::new(uuid::Uuid::new_v4().to_string(), input),
            RequestLine::Tagged { id, input } => Self::new(
                id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                input,
            ),
        };
        Ok(request)
    }
}
