//! Layers-model reader and evaluator.
//!
//! A layers model is a JSON document holding a Keras topology
//! (`modelTopology`) and a weights manifest (`weightsManifest`). Each
//! manifest group lists shard files, stored next to the JSON document,
//! whose concatenation holds the group's weights packed back to back as
//! little-endian values.
//!
//! Only `Sequential` stacks over flat `[batch, features]` inputs are
//! supported, which covers the dense regressors and classifiers this crate
//! is meant to serve.

use crate::assets::{AssetFetcher, AssetLocation};
use crate::error::{LoadError, ModelError};
use crate::models::InferenceModel;
use ndarray::{Array1, Array2, ArrayView2};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Parsed model description document
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    /// Keras topology, either bare or wrapped in `model_config`
    pub model_topology: Value,
    /// Weight groups in storage order
    #[serde(default)]
    pub weights_manifest: Vec<WeightGroup>,
    #[serde(default)]
    pub format: Option<String>,
}

/// One manifest group: shard files plus the weights packed into them
#[derive(Debug, Clone, Deserialize)]
pub struct WeightGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightSpec>,
}

/// A single named weight tensor
#[derive(Debug, Clone, Deserialize)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    #[serde(default)]
    pub quantization: Option<Value>,
}

fn default_dtype() -> String {
    "float32".to_string()
}

impl WeightSpec {
    /// Number of elements, or `None` if the shape overflows `usize`
    fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }
}

/// Element-wise activation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Relu6,
    Elu,
    Selu,
    Sigmoid,
    HardSigmoid,
    Tanh,
    Softmax,
    Softplus,
    Softsign,
    Swish,
    Gelu,
}

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

impl Activation {
    /// Look up an activation by its Keras name
    pub fn from_name(name: &str) -> Result<Self, LoadError> {
        let activation = match name {
            "linear" => Activation::Linear,
            "relu" => Activation::Relu,
            "relu6" => Activation::Relu6,
            "elu" => Activation::Elu,
            "selu" => Activation::Selu,
            "sigmoid" => Activation::Sigmoid,
            "hard_sigmoid" | "hardSigmoid" => Activation::HardSigmoid,
            "tanh" => Activation::Tanh,
            "softmax" => Activation::Softmax,
            "softplus" => Activation::Softplus,
            "softsign" => Activation::Softsign,
            "swish" | "silu" => Activation::Swish,
            "gelu" => Activation::Gelu,
            other => return Err(LoadError::UnsupportedActivation(other.to_string())),
        };
        Ok(activation)
    }

    fn from_config(value: Option<&Value>) -> Result<Self, LoadError> {
        match value {
            None | Some(Value::Null) => Ok(Activation::Linear),
            Some(Value::String(name)) => Self::from_name(name),
            Some(other) => Err(LoadError::UnsupportedActivation(other.to_string())),
        }
    }

    /// Apply in place to a `[batch, width]` matrix. Softmax is row-wise.
    pub fn apply(&self, x: &mut Array2<f32>) {
        match self {
            Activation::Linear => {}
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Relu6 => x.mapv_inplace(|v| v.clamp(0.0, 6.0)),
            Activation::Elu => x.mapv_inplace(|v| if v > 0.0 { v } else { v.exp_m1() }),
            Activation::Selu => x.mapv_inplace(|v| {
                if v > 0.0 {
                    SELU_SCALE * v
                } else {
                    SELU_SCALE * SELU_ALPHA * v.exp_m1()
                }
            }),
            Activation::Sigmoid => x.mapv_inplace(sigmoid),
            Activation::HardSigmoid => x.mapv_inplace(|v| (0.2 * v + 0.5).clamp(0.0, 1.0)),
            Activation::Tanh => x.mapv_inplace(f32::tanh),
            Activation::Softmax => {
                for mut row in x.rows_mut() {
                    let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
            }
            Activation::Softplus => x.mapv_inplace(|v| v.exp().ln_1p()),
            Activation::Softsign => x.mapv_inplace(|v| v / (1.0 + v.abs())),
            Activation::Swish => x.mapv_inplace(|v| v * sigmoid(v)),
            Activation::Gelu => x.mapv_inplace(|v| {
                let c = (2.0 / std::f32::consts::PI).sqrt();
                0.5 * v * (1.0 + (c * (v + 0.044_715 * v * v * v)).tanh())
            }),
        }
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// A compiled layer ready for evaluation
#[derive(Debug, Clone)]
enum Layer {
    Dense {
        kernel: Array2<f32>,
        bias: Option<Array1<f32>>,
        activation: Activation,
    },
    Activation(Activation),
    /// Folded batch normalization: `x * scale + offset`
    BatchNorm {
        scale: Array1<f32>,
        offset: Array1<f32>,
    },
    /// Dropout, noise and flatten layers are no-ops at inference time
    Identity,
}

impl Layer {
    fn apply(&self, x: Array2<f32>) -> Array2<f32> {
        match self {
            Layer::Dense {
                kernel,
                bias,
                activation,
            } => {
                let mut y = x.dot(kernel);
                if let Some(bias) = bias {
                    y += bias;
                }
                activation.apply(&mut y);
                y
            }
            Layer::Activation(activation) => {
                let mut y = x;
                activation.apply(&mut y);
                y
            }
            Layer::BatchNorm { scale, offset } => {
                let mut y = x;
                y *= scale;
                y += offset;
                y
            }
            Layer::Identity => x,
        }
    }
}

/// Decoded weights keyed by manifest name
struct WeightStore {
    weights: HashMap<String, (Vec<usize>, Vec<f32>)>,
}

impl WeightStore {
    /// Decode every group from its concatenated shard bytes.
    fn decode(groups: &[WeightGroup], group_data: &[Vec<u8>]) -> Result<Self, LoadError> {
        if groups.len() != group_data.len() {
            return Err(LoadError::WeightData(format!(
                "manifest has {} groups but {} buffers were supplied",
                groups.len(),
                group_data.len()
            )));
        }

        let mut weights = HashMap::new();
        for (group, data) in groups.iter().zip(group_data) {
            let mut offset = 0usize;
            for spec in &group.weights {
                if spec.quantization.is_some() {
                    return Err(LoadError::UnsupportedDtype {
                        name: spec.name.clone(),
                        dtype: format!("quantized {}", spec.dtype),
                    });
                }
                if spec.dtype != "float32" {
                    return Err(LoadError::UnsupportedDtype {
                        name: spec.name.clone(),
                        dtype: spec.dtype.clone(),
                    });
                }

                let end = spec
                    .element_count()
                    .and_then(|count| count.checked_mul(4))
                    .and_then(|byte_len| offset.checked_add(byte_len))
                    .ok_or_else(|| {
                        LoadError::WeightData(format!(
                            "{} has shape {:?}, which is too large",
                            spec.name, spec.shape
                        ))
                    })?;
                if end > data.len() {
                    return Err(LoadError::WeightData(format!(
                        "{} needs bytes {}..{} but the group holds {}",
                        spec.name,
                        offset,
                        end,
                        data.len()
                    )));
                }

                let values: Vec<f32> = data[offset..end]
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                weights.insert(spec.name.clone(), (spec.shape.clone(), values));
                offset = end;
            }

            if offset != data.len() {
                debug!(
                    consumed = offset,
                    available = data.len(),
                    "Weight group has trailing bytes"
                );
            }
        }

        Ok(Self { weights })
    }

    /// Find `<layer>/<param>`, exactly or as a unique path suffix
    fn find(&self, layer: &str, param: &str) -> Result<Option<&(Vec<usize>, Vec<f32>)>, LoadError> {
        let key = format!("{}/{}", layer, param);
        if let Some(found) = self.weights.get(&key) {
            return Ok(Some(found));
        }

        let suffix = format!("/{}", key);
        let mut matches: Vec<_> = self
            .weights
            .iter()
            .filter(|(name, _)| name.ends_with(&suffix))
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop().map(|(_, w)| w)),
            _ => {
                let mut names: Vec<&str> = matches.iter().map(|(name, _)| name.as_str()).collect();
                names.sort_unstable();
                Err(LoadError::InvalidModel(format!(
                    "weight {} is ambiguous: {}",
                    key,
                    names.join(", ")
                )))
            }
        }
    }

    fn require(&self, layer: &str, param: &str) -> Result<&(Vec<usize>, Vec<f32>), LoadError> {
        self.find(layer, param)?
            .ok_or_else(|| LoadError::MissingWeight(format!("{}/{}", layer, param)))
    }

    fn vector(&self, layer: &str, param: &str, len: usize) -> Result<Array1<f32>, LoadError> {
        let (shape, values) = self.require(layer, param)?;
        if values.len() != len {
            return Err(LoadError::WeightData(format!(
                "{}/{} has shape {:?}, expected [{}]",
                layer, param, shape, len
            )));
        }
        Ok(Array1::from(values.clone()))
    }
}

/// Pull the Sequential layer list out of the topology
fn sequential_layers(topology: &Value) -> Result<&Vec<Value>, LoadError> {
    let model_config = topology.get("model_config").unwrap_or(topology);

    let class_name = model_config
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or_else(|| LoadError::InvalidModel("topology has no class_name".to_string()))?;

    if class_name != "Sequential" {
        return Err(LoadError::InvalidModel(format!(
            "only Sequential models are supported, got {}",
            class_name
        )));
    }

    let config = model_config
        .get("config")
        .ok_or_else(|| LoadError::InvalidModel("topology has no config".to_string()))?;

    match config {
        Value::Array(layers) => Ok(layers),
        Value::Object(_) => config
            .get("layers")
            .and_then(Value::as_array)
            .ok_or_else(|| LoadError::InvalidModel("Sequential config has no layers".to_string())),
        _ => Err(LoadError::InvalidModel(
            "Sequential config is neither an object nor a list".to_string(),
        )),
    }
}

/// Feature count from `batch_input_shape` / `batch_shape`, if declared
fn declared_input_width(config: &Value) -> Result<Option<usize>, LoadError> {
    let shape = config
        .get("batch_input_shape")
        .or_else(|| config.get("batch_shape"))
        .and_then(Value::as_array);

    let Some(shape) = shape else {
        return Ok(None);
    };

    if shape.len() != 2 {
        return Err(LoadError::InvalidModel(format!(
            "only [batch, features] inputs are supported, got shape of rank {}",
            shape.len()
        )));
    }

    shape[1]
        .as_u64()
        .map(|w| Some(w as usize))
        .ok_or_else(|| LoadError::InvalidModel("input feature dimension is not fixed".to_string()))
}

/// Sequential model evaluated with `ndarray`
#[derive(Debug, Clone)]
pub struct LayersModel {
    name: String,
    input_dim: usize,
    output_dim: usize,
    layers: Vec<Layer>,
}

impl LayersModel {
    /// Fetch the model description and every weight shard it references.
    ///
    /// Shards are resolved relative to `location` and fetched one after
    /// another in manifest order.
    pub async fn load(fetcher: &AssetFetcher, location: &AssetLocation) -> Result<Self, LoadError> {
        let artifact: ModelArtifact = fetcher.fetch_json(location).await?;

        let mut group_data = Vec::with_capacity(artifact.weights_manifest.len());
        for group in &artifact.weights_manifest {
            let mut buffer = Vec::new();
            for path in &group.paths {
                let shard = location.join(path)?;
                buffer.extend(fetcher.fetch_bytes(&shard).await?);
            }
            group_data.push(buffer);
        }

        let model = Self::from_artifact(&artifact, &group_data)?;
        info!(
            model = %model.name,
            location = %location,
            layers = model.layers.len(),
            input_dim = model.input_dim,
            output_dim = model.output_dim,
            "Layers model loaded"
        );
        Ok(model)
    }

    /// Build a model from a parsed description and one byte buffer per
    /// manifest group (the group's shards already concatenated).
    pub fn from_artifact(artifact: &ModelArtifact, group_data: &[Vec<u8>]) -> Result<Self, LoadError> {
        let store = WeightStore::decode(&artifact.weights_manifest, group_data)?;
        let layer_values = sequential_layers(&artifact.model_topology)?;

        let model_config = artifact
            .model_topology
            .get("model_config")
            .unwrap_or(&artifact.model_topology);
        let name = model_config
            .get("config")
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("sequential")
            .to_string();

        let mut layers = Vec::with_capacity(layer_values.len());
        let mut width: Option<usize> = None;
        let mut input_dim: Option<usize> = None;

        for (index, layer_value) in layer_values.iter().enumerate() {
            let class_name = layer_value
                .get("class_name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    LoadError::InvalidModel(format!("layer {} has no class_name", index))
                })?;
            let config = layer_value.get("config").cloned().unwrap_or(Value::Null);
            let layer_name = config
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("layer_{}", index));

            if width.is_none() {
                if let Some(declared) = declared_input_width(&config)? {
                    width = Some(declared);
                    input_dim = Some(declared);
                }
            }

            let layer = match class_name {
                "InputLayer" => continue,
                "Dense" => {
                    let (shape, values) = store.require(&layer_name, "kernel")?;
                    if shape.len() != 2 {
                        return Err(LoadError::WeightData(format!(
                            "{}/kernel has shape {:?}, expected rank 2",
                            layer_name, shape
                        )));
                    }
                    let (rows, cols) = (shape[0], shape[1]);

                    match width {
                        Some(w) if w != rows => {
                            return Err(LoadError::InvalidModel(format!(
                                "layer {} expects {} inputs but receives {}",
                                layer_name, rows, w
                            )));
                        }
                        Some(_) => {}
                        None => {
                            input_dim = Some(rows);
                        }
                    }

                    if let Some(units) = config.get("units").and_then(Value::as_u64) {
                        if units as usize != cols {
                            return Err(LoadError::InvalidModel(format!(
                                "layer {} declares {} units but its kernel has {} columns",
                                layer_name, units, cols
                            )));
                        }
                    }

                    let kernel = Array2::from_shape_vec((rows, cols), values.clone())
                        .map_err(|e| LoadError::WeightData(format!("{}/kernel: {}", layer_name, e)))?;

                    let use_bias = config
                        .get("use_bias")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    let bias = if use_bias {
                        Some(store.vector(&layer_name, "bias", cols)?)
                    } else {
                        None
                    };

                    width = Some(cols);
                    Layer::Dense {
                        kernel,
                        bias,
                        activation: Activation::from_config(config.get("activation"))?,
                    }
                }
                "Activation" => Layer::Activation(Activation::from_config(config.get("activation"))?),
                "BatchNormalization" => {
                    let (_, mean) = store.require(&layer_name, "moving_mean")?;
                    let features = match width {
                        Some(w) => w,
                        None => {
                            input_dim = Some(mean.len());
                            mean.len()
                        }
                    };

                    let epsilon = config
                        .get("epsilon")
                        .and_then(Value::as_f64)
                        .unwrap_or(1e-3) as f32;
                    let use_scale = config.get("scale").and_then(Value::as_bool).unwrap_or(true);
                    let use_center = config.get("center").and_then(Value::as_bool).unwrap_or(true);

                    let mean = store.vector(&layer_name, "moving_mean", features)?;
                    let variance = store.vector(&layer_name, "moving_variance", features)?;
                    let gamma = if use_scale {
                        store.vector(&layer_name, "gamma", features)?
                    } else {
                        Array1::ones(features)
                    };
                    let beta = if use_center {
                        store.vector(&layer_name, "beta", features)?
                    } else {
                        Array1::zeros(features)
                    };

                    let scale = &gamma / &variance.mapv(|v| (v + epsilon).sqrt());
                    let offset = &beta - &(&mean * &scale);

                    width = Some(features);
                    Layer::BatchNorm { scale, offset }
                }
                "Dropout" | "AlphaDropout" | "GaussianDropout" | "GaussianNoise" | "Flatten" => {
                    Layer::Identity
                }
                other => return Err(LoadError::UnsupportedLayer(other.to_string())),
            };

            debug!(layer = %layer_name, class = class_name, width = ?width, "Compiled layer");
            layers.push(layer);
        }

        let input_dim = input_dim.ok_or_else(|| {
            LoadError::InvalidModel("cannot determine the model input dimension".to_string())
        })?;
        let output_dim = width.unwrap_or(input_dim);

        Ok(Self {
            name,
            input_dim,
            output_dim,
            layers,
        })
    }

    /// Number of compiled layers (input layers excluded)
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

impl InferenceModel for LayersModel {
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

        Ok(self
            .layers
            .iter()
            .fold(input.to_owned(), |x, layer| layer.apply(x)))
    }
}
