//! Per-feature scale table applied to raw inputs before inference.
//!
//! The table is a JSON array of divisors, index-aligned with the model's
//! input features. Scaling is plain element-wise division.

use crate::config::ScalingPolicy;
use crate::error::{LoadError, PredictError};
use serde::Deserialize;

/// Ordered per-feature divisors
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Vec<f32>")]
pub struct ScaleTable {
    divisors: Vec<f32>,
}

impl TryFrom<Vec<f32>> for ScaleTable {
    type Error = LoadError;

    fn try_from(divisors: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(divisors)
    }
}

impl ScaleTable {
    /// Build a table from divisors. An empty table is rejected.
    pub fn new(divisors: Vec<f32>) -> Result<Self, LoadError> {
        if divisors.is_empty() {
            return Err(LoadError::InvalidScaleTable(
                "scale table is empty".to_string(),
            ));
        }
        Ok(Self { divisors })
    }

    /// Parse the JSON wire format (an array of numbers)
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, LoadError> {
        let divisors: Vec<f32> = serde_json::from_slice(bytes)
            .map_err(|e| LoadError::InvalidScaleTable(e.to_string()))?;
        Self::new(divisors)
    }

    /// Number of features the table scales
    pub fn len(&self) -> usize {
        self.divisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.divisors.is_empty()
    }

    pub fn divisors(&self) -> &[f32] {
        &self.divisors
    }

    /// Indices of zero divisors
    pub fn zero_entries(&self) -> Vec<usize> {
        self.divisors
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Divide `input` element-wise by the table.
    ///
    /// Length mismatches are always rejected. Zero divisors are rejected
    /// under [`ScalingPolicy::Strict`]; under [`ScalingPolicy::Permissive`]
    /// the IEEE result (±inf or NaN) is returned as is.
    pub fn scale(&self, input: &[f32], policy: ScalingPolicy) -> Result<Vec<f32>, PredictError> {
        let mut scaled = Vec::with_capacity(self.divisors.len());
        self.scale_into(input, policy, &mut scaled)?;
        Ok(scaled)
    }

    /// Like [`ScaleTable::scale`] but appends to an existing buffer.
    pub fn scale_into(
        &self,
        input: &[f32],
        policy: ScalingPolicy,
        out: &mut Vec<f32>,
    ) -> Result<(), PredictError> {
        if input.len() != self.divisors.len() {
            return Err(PredictError::LengthMismatch {
                expected: self.divisors.len(),
                actual: input.len(),
            });
        }

        if policy == ScalingPolicy::Strict {
            if let Some(index) = self.divisors.iter().position(|&d| d == 0.0) {
                return Err(PredictError::ZeroDivisor { index });
            }
        }

        out.extend(input.iter().zip(&self.divisors).map(|(&x, &d)| x / d));
        Ok(())
    }
}
