//! Model and scale table loader

use crate::assets::{AssetFetcher, AssetLocation};
use crate::config::{AssetsConfig, ModelBackend};
use crate::error::LoadError;
use crate::models::{InferenceModel, LayersModel};
use crate::predictor::PredictorContext;
use crate::scaler::ScaleTable;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Loads the model and scale table described by an [`AssetsConfig`]
pub struct ModelLoader {
    fetcher: AssetFetcher,
    config: AssetsConfig,
}

impl ModelLoader {
    /// Create a loader for the configured asset locations
    pub fn new(config: &AssetsConfig) -> Result<Self, LoadError> {
        let fetcher = AssetFetcher::new(Duration::from_millis(config.request_timeout_ms))?;
        Ok(Self {
            fetcher,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &AssetsConfig {
        &self.config
    }

    /// Fetch the model, then the scale table, and pair them.
    ///
    /// Every call refetches both resources; there is no partial reuse of a
    /// previous attempt.
    pub async fn load(&self) -> Result<PredictorContext, LoadError> {
        let start = Instant::now();
        let model_location = AssetLocation::parse(&self.config.model)?;
        let scaler_location = AssetLocation::parse(&self.config.scaler)?;

        info!(
            model = %model_location,
            scaler = %scaler_location,
            backend = ?self.config.backend,
            "Loading model assets"
        );

        let context = match self.config.backend {
            ModelBackend::Layers => {
                let model = self.load_layers_model(&model_location).await?;
                let scaler = self.load_scale_table(&scaler_location).await?;
                PredictorContext::new(model, scaler, self.config.scaling)?
            }
            ModelBackend::Onnx => {
                // The probe run needs the feature count, so read the model
                // bytes first and build the session once the table is known.
                let bytes = self.fetcher.fetch_bytes(&model_location).await?;
                let scaler = self.load_scale_table(&scaler_location).await?;
                let model = self.build_onnx_model(&model_location, &bytes, scaler.len())?;
                PredictorContext::new(model, scaler, self.config.scaling)?
            }
        };

        info!(
            model = %context.model().name(),
            features = context.feature_count(),
            outputs = context.output_dim(),
            policy = ?context.policy(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model assets loaded"
        );

        Ok(context)
    }

    /// Fetch and compile a layers-model description with its weight shards
    pub async fn load_layers_model(
        &self,
        location: &AssetLocation,
    ) -> Result<Arc<dyn InferenceModel>, LoadError> {
        let model = LayersModel::load(&self.fetcher, location).await?;
        Ok(Arc::new(model))
    }

    /// Fetch and parse the scale table
    pub async fn load_scale_table(&self, location: &AssetLocation) -> Result<ScaleTable, LoadError> {
        let bytes = self.fetcher.fetch_bytes(location).await?;
        let table = ScaleTable::from_json_slice(&bytes)?;

        for index in table.zero_entries() {
            warn!(
                scaler = %location,
                index = index,
                policy = ?self.config.scaling,
                "Scale table has a zero divisor"
            );
        }

        info!(scaler = %location, features = table.len(), "Scale table loaded");
        Ok(table)
    }

    #[cfg(feature = "onnx")]
    fn build_onnx_model(
        &self,
        location: &AssetLocation,
        bytes: &[u8],
        input_dim: usize,
    ) -> Result<Arc<dyn InferenceModel>, LoadError> {
        let name = location.to_string();
        let model = crate::models::onnx::OnnxModel::from_bytes(
            &name,
            bytes,
            input_dim,
            self.config.onnx_threads,
        )?;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "onnx"))]
    fn build_onnx_model(
        &self,
        location: &AssetLocation,
        _bytes: &[u8],
        _input_dim: usize,
    ) -> Result<Arc<dyn InferenceModel>, LoadError> {
        Err(LoadError::Onnx(format!(
            "{} needs the onnx backend, which this build does not include",
            location
        )))
    }
}

/// Load the configured model and scale table in one call.
pub async fn load_model(config: &AssetsConfig) -> Result<PredictorContext, LoadError> {
    ModelLoader::new(config)?.load().await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ScalingPolicy;
    use crate::error::PredictError;
    use crate::models::layers::tests::{linear_model_json, linear_model_weights};
    use std::path::PathBuf;

    /// Write the two-feature linear fixture plus `scaler` into a fresh dir.
    pub(crate) fn write_assets(scaler: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scaled-inference-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.json"), linear_model_json()).unwrap();
        std::fs::write(dir.join("group1-shard1of1.bin"), linear_model_weights()).unwrap();
        std::fs::write(dir.join("scaler.json"), scaler).unwrap();
        dir
    }

    pub(crate) fn assets_config(dir: &PathBuf) -> AssetsConfig {
        AssetsConfig {
            model: dir.join("model.json").display().to_string(),
            scaler: dir.join("scaler.json").display().to_string(),
            ..AssetsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_load_and_predict() {
        let dir = write_assets("[2, 4]");

        let ctx = load_model(&assets_config(&dir)).await.unwrap();
        assert_eq!(ctx.feature_count(), 2);
        assert_eq!(ctx.output_dim(), 2);
        assert_eq!(ctx.policy(), ScalingPolicy::Strict);

        // [4, 4] / [2, 4] = [2, 1] -> [2*1 + 1*3 + 0.5, 2*2 + 1*4 - 0.5]
        assert_eq!(ctx.predict(&[4.0, 4.0]).unwrap(), vec![5.5, 7.5]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_feature_count_mismatch_fails_load() {
        let dir = write_assets("[2, 4, 8]");

        let err = load_model(&assets_config(&dir)).await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::FeatureCountMismatch {
                model: 2,
                scaler: 3
            }
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_assets_fail_load() {
        let dir = write_assets("[2, 4]");
        std::fs::remove_file(dir.join("group1-shard1of1.bin")).unwrap();

        let err = load_model(&assets_config(&dir)).await.unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_malformed_scaler_fails_load() {
        let dir = write_assets("{\"scale\": 2}");

        let err = load_model(&assets_config(&dir)).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidScaleTable(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_reload_after_fix() {
        let dir = write_assets("[2]");
        let loader = ModelLoader::new(&assets_config(&dir)).unwrap();
        assert!(loader.load().await.is_err());

        std::fs::write(dir.join("scaler.json"), "[1, 0]").unwrap();
        let ctx = loader.load().await.unwrap();
        assert_eq!(
            ctx.predict(&[1.0, 1.0]),
            Err(PredictError::ZeroDivisor { index: 1 })
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    /// Serve `files` over HTTP on a local port; unknown paths get a 404.
    async fn serve_http(files: Vec<(&'static str, Vec<u8>)>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let files = files.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let request = String::from_utf8_lossy(&request);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = match files.iter().find(|(name, _)| path == format!("/{}", name)) {
                        Some((_, body)) => ("200 OK", body.clone()),
                        None => ("404 Not Found", b"not found".to_vec()),
                    };

                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_load_over_http() {
        let base = serve_http(vec![
            ("m/model.json", linear_model_json().into_bytes()),
            ("m/group1-shard1of1.bin", linear_model_weights()),
            ("scaler.json", b"[2, 4]".to_vec()),
        ])
        .await;

        let config = AssetsConfig {
            model: format!("{}/m/model.json", base),
            scaler: format!("{}/scaler.json", base),
            ..AssetsConfig::default()
        };
        let ctx = load_model(&config).await.unwrap();
        assert_eq!(ctx.predict(&[4.0, 4.0]).unwrap(), vec![5.5, 7.5]);

        let config = AssetsConfig {
            scaler: format!("{}/missing.json", base),
            ..config
        };
        let err = load_model(&config).await.unwrap_err();
        assert!(matches!(err, LoadError::HttpStatus { status: 404, .. }));
    }

    #[cfg(not(feature = "onnx"))]
    #[tokio::test]
    async fn test_onnx_backend_requires_feature() {
        let dir = write_assets("[2, 4]");
        let config = AssetsConfig {
            backend: ModelBackend::Onnx,
            ..assets_config(&dir)
        };

        let err = load_model(&config).await.unwrap_err();
        assert!(matches!(err, LoadError::Onnx(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
