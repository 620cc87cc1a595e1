//! ONNX Runtime backend

use crate::error::{LoadError, ModelError};
use crate::models::InferenceModel;
use ndarray::{Array2, ArrayView2};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::sync::{Mutex, Once};
use tracing::info;

static ORT_INIT: Once = Once::new();

/// ONNX model session with metadata
pub struct OnnxModel {
    /// Model name
    name: String,
    /// ONNX Runtime session; running it needs exclusive access
    session: Mutex<Session>,
    /// Input name for the model
    input_name: String,
    /// Output name read back after each run
    output_name: String,
    input_dim: usize,
    output_dim: usize,
}

impl OnnxModel {
    /// Build a session from model bytes and probe it with a `[1, input_dim]`
    /// zero matrix to learn the output width.
    pub fn from_bytes(
        name: &str,
        bytes: &[u8],
        input_dim: usize,
        onnx_threads: usize,
    ) -> Result<Self, LoadError> {
        ORT_INIT.call_once(|| {
            if let Err(e) = ort::init().commit() {
                tracing::warn!(error = %e, "ONNX Runtime environment init failed");
            }
        });

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(onnx_threads.max(1)))
            .and_then(|b| b.commit_from_memory(bytes))
            .map_err(|e| LoadError::Onnx(format!("failed to build session for {}: {}", name, e)))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| LoadError::Onnx(format!("{} declares no inputs", name)))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| LoadError::Onnx(format!("{} declares no outputs", name)))?;

        let mut model = Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            input_dim,
            output_dim: 0,
        };

        let probe = Array2::<f32>::zeros((1, input_dim));
        let output = model.run(probe.view()).map_err(|e| {
            LoadError::Onnx(format!(
                "{} rejected a probe input with {} features: {}",
                name, input_dim, e
            ))
        })?;
        model.output_dim = output.ncols();

        info!(
            model = %model.name,
            input = %model.input_name,
            output = %model.output_name,
            input_dim = model.input_dim,
            output_dim = model.output_dim,
            threads = onnx_threads,
            "ONNX model loaded"
        );

        Ok(model)
    }

    fn run(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>, ModelError> {
        let (rows, cols) = input.dim();
        let shape = vec![rows as i64, cols as i64];
        let input_tensor = Tensor::from_array((shape, input.iter().copied().collect::<Vec<f32>>()))
            .map_err(|e| ModelError::Backend(format!("failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Backend(format!("lock error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input_tensor])
            .map_err(|e| ModelError::Backend(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| ModelError::Backend(format!("missing output {}", self.output_name)))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Backend(e.to_string()))?;

        if rows == 0 || data.len() % rows != 0 {
            return Err(ModelError::Backend(format!(
                "output of {} values cannot be split into {} rows",
                data.len(),
                rows
            )));
        }

        Array2::from_shape_vec((rows, data.len() / rows), data.to_vec())
            .map_err(|e| ModelError::Backend(e.to_string()))
    }
}

impl InferenceModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn predict(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>, ModelError> {
        if input.ncols() != self.input_dim {
            return Err(ModelError::InputShape {
                expected: self.input_dim,
                actual: input.ncols(),
            });
        }
        self.run(input)
    }
}
