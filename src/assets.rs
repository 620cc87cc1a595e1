//! Asset fetching from local paths or HTTP(S) URLs

use crate::error::LoadError;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A resolved asset location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    /// Fetched over HTTP(S)
    Url(Url),
    /// Read from the local filesystem
    Path(PathBuf),
}

impl AssetLocation {
    /// Parse a configured location. `http://` and `https://` become URLs,
    /// `file://` URLs become paths, anything else is taken as a path.
    pub fn parse(location: &str) -> Result<Self, LoadError> {
        let trimmed = location.trim();
        if trimmed.is_empty() {
            return Err(LoadError::InvalidLocation {
                location: location.to_string(),
                reason: "empty location".to_string(),
            });
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(trimmed).map_err(|e| LoadError::InvalidLocation {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(AssetLocation::Url(url));
        }

        if lower.starts_with("file://") {
            let url = Url::parse(trimmed).map_err(|e| LoadError::InvalidLocation {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
            let path = url.to_file_path().map_err(|_| LoadError::InvalidLocation {
                location: location.to_string(),
                reason: "not a local file URL".to_string(),
            })?;
            return Ok(AssetLocation::Path(path));
        }

        Ok(AssetLocation::Path(PathBuf::from(trimmed)))
    }

    /// Resolve a sibling resource (e.g. a weight shard) relative to this location.
    pub fn join(&self, relative: &str) -> Result<Self, LoadError> {
        match self {
            AssetLocation::Url(url) => {
                let joined = url.join(relative).map_err(|e| LoadError::InvalidLocation {
                    location: relative.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(AssetLocation::Url(joined))
            }
            AssetLocation::Path(path) => {
                let base = path.parent().unwrap_or_else(|| Path::new(""));
                Ok(AssetLocation::Path(base.join(relative)))
            }
        }
    }
}

impl fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetLocation::Url(url) => write!(f, "{}", url),
            AssetLocation::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Fetches raw bytes and JSON documents
#[derive(Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
}

impl AssetFetcher {
    /// Create a fetcher whose HTTP requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| LoadError::Http {
                location: "http client".to_string(),
                source,
            })?;
        Ok(Self { client })
    }

    /// Fetch the full contents of an asset
    pub async fn fetch_bytes(&self, location: &AssetLocation) -> Result<Vec<u8>, LoadError> {
        let bytes = match location {
            AssetLocation::Path(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|source| LoadError::Io {
                        location: location.to_string(),
                        source,
                    })?
            }
            AssetLocation::Url(url) => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|source| LoadError::Http {
                        location: location.to_string(),
                        source,
                    })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(LoadError::HttpStatus {
                        location: location.to_string(),
                        status: status.as_u16(),
                    });
                }

                response
                    .bytes()
                    .await
                    .map_err(|source| LoadError::Http {
                        location: location.to_string(),
                        source,
                    })?
                    .to_vec()
            }
        };

        debug!(location = %location, bytes = bytes.len(), "Fetched asset");
        Ok(bytes)
    }

    /// Fetch an asset and parse it as JSON
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        location: &AssetLocation,
    ) -> Result<T, LoadError> {
        let bytes = self.fetch_bytes(location).await?;
        serde_json::from_slice(&bytes).map_err(|source| LoadError::Json {
            location: location.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scaled-inference-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            AssetLocation::parse("assets/model.json").unwrap(),
            AssetLocation::Path(PathBuf::from("assets/model.json"))
        );

        match AssetLocation::parse("https://cdn.example.com/m/model.json").unwrap() {
            AssetLocation::Url(url) => assert_eq!(url.host_str(), Some("cdn.example.com")),
            other => panic!("expected url, got {:?}", other),
        }

        assert!(matches!(
            AssetLocation::parse("   "),
            Err(LoadError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn test_join_relative() {
        let path = AssetLocation::parse("assets/model.json").unwrap();
        assert_eq!(
            path.join("group1-shard1of1.bin").unwrap(),
            AssetLocation::Path(PathBuf::from("assets/group1-shard1of1.bin"))
        );

        let bare = AssetLocation::parse("model.json").unwrap();
        assert_eq!(
            bare.join("weights.bin").unwrap(),
            AssetLocation::Path(PathBuf::from("weights.bin"))
        );

        let url = AssetLocation::parse("https://cdn.example.com/m/model.json").unwrap();
        assert_eq!(
            url.join("group1-shard1of1.bin").unwrap().to_string(),
            "https://cdn.example.com/m/group1-shard1of1.bin"
        );
    }

    #[tokio::test]
    async fn test_fetch_local_json() {
        let dir = temp_dir();
        let path = dir.join("scaler.json");
        std::fs::write(&path, "[2.0, 4.0]").unwrap();

        let fetcher = AssetFetcher::new(Duration::from_secs(1)).unwrap();
        let values: Vec<f32> = fetcher
            .fetch_json(&AssetLocation::Path(path))
            .await
            .unwrap();
        assert_eq!(values, vec![2.0, 4.0]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fetch_missing_and_malformed() {
        let dir = temp_dir();
        let fetcher = AssetFetcher::new(Duration::from_secs(1)).unwrap();

        let missing = AssetLocation::Path(dir.join("nope.json"));
        assert!(matches!(
            fetcher.fetch_bytes(&missing).await,
            Err(LoadError::Io { .. })
        ));

        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        let result: Result<Vec<f32>, _> = fetcher.fetch_json(&AssetLocation::Path(bad)).await;
        assert!(matches!(result, Err(LoadError::Json { .. })));

        std::fs::remove_dir_all(&dir).ok();
    }
}
