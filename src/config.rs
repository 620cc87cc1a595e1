//! Configuration management for the inference service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Model backend used to interpret the model description
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// Layers-model JSON with binary weight shards, evaluated natively
    #[default]
    Layers,
    /// ONNX graph run through ONNX Runtime (requires the `onnx` feature)
    Onnx,
}

/// How the scaler treats zero divisors
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScalingPolicy {
    /// Reject inputs that would be divided by zero
    #[default]
    Strict,
    /// Divide anyway and let infinities/NaN reach the model
    Permissive,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the model and scale table live and how to read them
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    /// Model description location (path or http(s) URL)
    #[serde(default = "default_model_location")]
    pub model: String,
    /// Scale table location (path or http(s) URL)
    #[serde(default = "default_scaler_location")]
    pub scaler: String,
    #[serde(default)]
    pub backend: ModelBackend,
    /// Timeout for each HTTP request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Scaling policy handed to the loaded context, set from `[scaling]`
    #[serde(skip)]
    pub scaling: ScalingPolicy,
    /// Intra-op threads for the ONNX backend, set from `[runtime]`
    #[serde(skip, default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_model_location() -> String {
    "assets/model.json".to_string()
}

fn default_scaler_location() -> String {
    "assets/scaler.json".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_onnx_threads() -> usize {
    1
}

fn default_metrics_interval_secs() -> u64 {
    30
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            model: default_model_location(),
            scaler: default_scaler_location(),
            backend: ModelBackend::default(),
            request_timeout_ms: default_request_timeout_ms(),
            scaling: ScalingPolicy::default(),
            onnx_threads: default_onnx_threads(),
        }
    }
}

/// Scaling configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScalingConfig {
    #[serde(default)]
    pub policy: ScalingPolicy,
}

/// Runtime knobs
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Seconds between metrics summaries; 0 disables the reporter
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            onnx_threads: default_onnx_threads(),
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/config.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/config").required(false))
            .add_source(Environment::with_prefix("SCALED_INFERENCE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize::<AppConfig>()
            .map(AppConfig::normalized)
            .context("Failed to deserialize configuration")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("SCALED_INFERENCE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize::<AppConfig>()
            .map(AppConfig::normalized)
            .context("Failed to deserialize configuration")
    }

    /// Asset settings with the scaling policy and thread count folded in.
    ///
    /// `[scaling]` and `[runtime]` are the user-facing sections; the loader
    /// only sees `AssetsConfig`.
    fn normalized(mut self) -> Self {
        self.assets.scaling = self.scaling.policy;
        self.assets.onnx_threads = self.runtime.onnx_threads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.assets.model, "assets/model.json");
        assert_eq!(config.assets.scaler, "assets/scaler.json");
        assert_eq!(config.assets.backend, ModelBackend::Layers);
        assert_eq!(config.scaling.policy, ScalingPolicy::Strict);
        assert_eq!(config.runtime.onnx_threads, 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_path() {
        let dir = std::env::temp_dir().join(format!("scaled-inference-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[assets]
model = "https://cdn.example.com/model.json"
backend = "onnx"

[scaling]
policy = "permissive"

[runtime]
onnx_threads = 4

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.assets.model, "https://cdn.example.com/model.json");
        assert_eq!(config.assets.scaler, "assets/scaler.json");
        assert_eq!(config.assets.backend, ModelBackend::Onnx);
        assert_eq!(config.assets.scaling, ScalingPolicy::Permissive);
        assert_eq!(config.assets.onnx_threads, 4);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_assets_section_cannot_set_derived_keys() {
        let dir = std::env::temp_dir().join(format!("scaled-inference-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            r#"
[assets]
scaler = "tables/scaler.json"
scaling = "permissive"
onnx_threads = 8
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.assets.scaler, "tables/scaler.json");
        assert_eq!(config.assets.scaling, ScalingPolicy::Strict);
        assert_eq!(config.assets.onnx_threads, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
