//! Scaled Inference Library
//!
//! Loads a pretrained network and a per-feature scale table, then serves
//! predictions: each raw input vector is divided element-wise by the table,
//! run through the model as a single-row batch, and the output row returned.

pub mod assets;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod predictor;
pub mod scaler;
pub mod serve;
pub mod state;
pub mod types;

pub use config::{AppConfig, AssetsConfig, ModelBackend, ScalingPolicy};
pub use error::{LoadError, ModelError, PredictError};
pub use models::loader::load_model;
pub use models::{InferenceModel, LayersModel, ModelLoader};
pub use predictor::{predict, PredictorContext};
pub use scaler::ScaleTable;
pub use state::{LoadState, ModelHandle};
