//! Scaled prediction over a loaded model and scale table

use crate::config::ScalingPolicy;
use crate::error::{LoadError, ModelError, PredictError};
use crate::models::InferenceModel;
use crate::scaler::ScaleTable;
use ndarray::Array2;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Caller-owned pair of model and scale table.
///
/// A context only exists once both resources are loaded and agree on the
/// feature count, so predicting through it can never observe a half-loaded
/// state. Clones share the model.
#[derive(Clone)]
pub struct PredictorContext {
    model: Arc<dyn InferenceModel>,
    scaler: ScaleTable,
    policy: ScalingPolicy,
}

impl PredictorContext {
    /// Pair a model with a scale table. Fails if the table length differs
    /// from the model's input dimension.
    pub fn new(
        model: Arc<dyn InferenceModel>,
        scaler: ScaleTable,
        policy: ScalingPolicy,
    ) -> Result<Self, LoadError> {
        if model.input_dim() != scaler.len() {
            return Err(LoadError::FeatureCountMismatch {
                model: model.input_dim(),
                scaler: scaler.len(),
            });
        }

        Ok(Self {
            model,
            scaler,
            policy,
        })
    }

    pub fn model(&self) -> &dyn InferenceModel {
        self.model.as_ref()
    }

    pub fn scaler(&self) -> &ScaleTable {
        &self.scaler
    }

    pub fn policy(&self) -> ScalingPolicy {
        self.policy
    }

    /// Number of input features expected per call
    pub fn feature_count(&self) -> usize {
        self.scaler.len()
    }

    /// Number of values returned per prediction
    pub fn output_dim(&self) -> usize {
        self.model.output_dim()
    }

    /// Scale an input vector without running the model
    pub fn scale(&self, input: &[f32]) -> Result<Vec<f32>, PredictError> {
        self.scaler.scale(input, self.policy)
    }

    /// Scale `input`, run it as a single-row batch and return the output row.
    pub fn predict(&self, input: &[f32]) -> Result<Vec<f32>, PredictError> {
        let scaled = self.scale(input)?;
        let width = scaled.len();
        let batch = Array2::from_shape_vec((1, width), scaled)
            .map_err(|e| ModelError::Backend(e.to_string()))?;

        let output = self.model.predict(batch.view())?;
        trace!(model = %self.model.name(), outputs = output.len(), "Prediction complete");

        Ok(output.iter().copied().collect())
    }

    /// Predict several inputs with one forward pass.
    ///
    /// Every row is validated first; the first invalid row fails the batch.
    pub fn predict_batch(&self, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, PredictError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let width = self.scaler.len();
        let mut flat = Vec::with_capacity(inputs.len() * width);
        for input in inputs {
            self.scaler.scale_into(input, self.policy, &mut flat)?;
        }

        let batch = Array2::from_shape_vec((inputs.len(), width), flat)
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        let output = self.model.predict(batch.view())?;

        Ok(output.rows().into_iter().map(|row| row.to_vec()).collect())
    }
}

impl fmt::Debug for PredictorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictorContext")
            .field("model", &self.model.name())
            .field("features", &self.scaler.len())
            .field("outputs", &self.model.output_dim())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Scale `input` with the context's table and return the model output.
pub fn predict(ctx: &PredictorContext, input: &[f32]) -> Result<Vec<f32>, PredictError> {
    ctx.predict(input)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::layers::tests::{linear_model_json, linear_model_weights};
    use crate::models::layers::{LayersModel, ModelArtifact};
    use ndarray::ArrayView2;
    use std::sync::Mutex;

    /// Records every batch it receives and returns the row sums.
    pub(crate) struct RecordingModel {
        pub(crate) width: usize,
        pub(crate) seen: Mutex<Vec<Vec<f32>>>,
    }

    impl RecordingModel {
        pub(crate) fn new(width: usize) -> Self {
            Self {
                width,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl InferenceModel for RecordingModel {
        fn name(&self) -> &str {
            "recording"
        }

        fn input_dim(&self) -> usize {
            self.width
        }

        fn output_dim(&self) -> usize {
            1
        }

        fn predict(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>, ModelError> {
            let mut seen = self.seen.lock().unwrap();
            for row in input.rows() {
                seen.push(row.to_vec());
            }
            let sums: Vec<f32> = input.rows().into_iter().map(|r| r.sum()).collect();
            Ok(Array2::from_shape_vec((input.nrows(), 1), sums).unwrap())
        }
    }

    fn recording_context(scale: Vec<f32>, policy: ScalingPolicy) -> (Arc<RecordingModel>, PredictorContext) {
        let model = Arc::new(RecordingModel::new(scale.len()));
        let ctx = PredictorContext::new(model.clone(), ScaleTable::new(scale).unwrap(), policy)
            .unwrap();
        (model, ctx)
    }

    fn layers_context() -> PredictorContext {
        let artifact: ModelArtifact = serde_json::from_str(&linear_model_json()).unwrap();
        let model = LayersModel::from_artifact(&artifact, &[linear_model_weights()]).unwrap();
        PredictorContext::new(
            Arc::new(model),
            ScaleTable::new(vec![2.0, 4.0]).unwrap(),
            ScalingPolicy::Strict,
        )
        .unwrap()
    }

    #[test]
    fn test_scaled_input_reaches_model() {
        let (model, ctx) = recording_context(vec![2.0, 4.0], ScalingPolicy::Strict);

        let output = ctx.predict(&[10.0, 8.0]).unwrap();

        assert_eq!(*model.seen.lock().unwrap(), vec![vec![5.0, 2.0]]);
        assert_eq!(output, vec![7.0]);
    }

    #[test]
    fn test_output_length_matches_model() {
        let ctx = layers_context();
        assert_eq!(ctx.feature_count(), 2);

        for input in [[0.0_f32, 0.0], [2.0, 4.0], [-6.0, 100.0]] {
            let output = predict(&ctx, &input).unwrap();
            assert_eq!(output.len(), ctx.output_dim());
        }

        // [2, 4] / [2, 4] = [1, 1] -> [4.5, 5.5]
        assert_eq!(ctx.predict(&[2.0, 4.0]).unwrap(), vec![4.5, 5.5]);
    }

    #[test]
    fn test_predict_is_idempotent() {
        let ctx = layers_context();
        let first = ctx.predict(&[3.0, -1.5]).unwrap();
        let second = ctx.predict(&[3.0, -1.5]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_length_mismatch_skips_model() {
        let (model, ctx) = recording_context(vec![2.0, 4.0, 8.0], ScalingPolicy::Permissive);

        assert_eq!(
            ctx.predict(&[1.0, 2.0]),
            Err(PredictError::LengthMismatch {
                expected: 3,
                actual: 2
            })
        );
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_divisor_strict() {
        let (model, ctx) = recording_context(vec![1.0, 0.0], ScalingPolicy::Strict);
        assert_eq!(
            ctx.predict(&[1.0, 1.0]),
            Err(PredictError::ZeroDivisor { index: 1 })
        );
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_divisor_permissive_is_observable() {
        let (model, ctx) = recording_context(vec![1.0, 0.0], ScalingPolicy::Permissive);

        let output = ctx.predict(&[1.0, 1.0]).unwrap();
        let seen = model.seen.lock().unwrap();
        assert!(seen[0][1].is_infinite());
        assert!(output[0].is_infinite());
        drop(seen);

        let output = ctx.predict(&[1.0, 0.0]).unwrap();
        assert!(model.seen.lock().unwrap()[1][1].is_nan());
        assert!(output[0].is_nan());
    }

    #[test]
    fn test_feature_count_mismatch() {
        let model = Arc::new(RecordingModel::new(3));
        let err = PredictorContext::new(
            model,
            ScaleTable::new(vec![1.0, 2.0]).unwrap(),
            ScalingPolicy::Strict,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LoadError::FeatureCountMismatch {
                model: 3,
                scaler: 2
            }
        ));
    }

    #[test]
    fn test_predict_batch() {
        let (model, ctx) = recording_context(vec![2.0, 4.0], ScalingPolicy::Strict);

        let outputs = ctx
            .predict_batch(&[vec![10.0, 8.0], vec![2.0, 4.0]])
            .unwrap();
        assert_eq!(outputs, vec![vec![7.0], vec![2.0]]);
        assert_eq!(
            *model.seen.lock().unwrap(),
            vec![vec![5.0, 2.0], vec![1.0, 1.0]]
        );

        assert_eq!(ctx.predict_batch(&[]).unwrap(), Vec::<Vec<f32>>::new());
        assert!(matches!(
            ctx.predict_batch(&[vec![1.0, 1.0], vec![1.0]]),
            Err(PredictError::LengthMismatch { .. })
        ));
    }
}
