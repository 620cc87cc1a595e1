//! ML model backends and loading

pub mod layers;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;

use crate::error::ModelError;
use ndarray::{Array2, ArrayView2};

pub use layers::LayersModel;
pub use loader::ModelLoader;

/// A loaded, immutable inference model taking `[batch, features]` input.
pub trait InferenceModel: Send + Sync {
    /// Human-readable model name for logs
    fn name(&self) -> &str;

    /// Number of input features per row
    fn input_dim(&self) -> usize;

    /// Number of output values per row
    fn output_dim(&self) -> usize;

    /// Run the forward pass on a batch, returning `[batch, output_dim]`
    fn predict(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>, ModelError>;
}
