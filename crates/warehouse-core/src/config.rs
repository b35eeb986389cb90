//! Configuration module
//!
//! This module provides the configuration consumed by the Warehouse front
//! controller and the backend factories: which backend to use by default,
//! default location and bucket, and the per-backend connection settings.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

const LOCAL_STORAGE_PATH: &str = "./static";
const LOCAL_STORAGE_BASE_URL: &str = "http://localhost:5000/static";

/// Local filesystem backend settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalSettings {
    /// Root directory; every bucket is a directory underneath it.
    pub root: PathBuf,
    /// Base URL the static-file server exposes `root` under.
    pub base_url: String,
}

impl Default for LocalSettings {
    fn default() -> Self {
        LocalSettings {
            root: PathBuf::from(LOCAL_STORAGE_PATH),
            base_url: LOCAL_STORAGE_BASE_URL.to_string(),
        }
    }
}

/// S3 backend settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Warehouse configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub default_service: String,
    pub default_location: Option<String>,
    pub default_bucket: Option<String>,
    pub local: LocalSettings,
    pub s3: S3Settings,
}

impl WarehouseConfig {
    /// Minimal configuration for `default_service`, everything else defaulted.
    pub fn new(default_service: impl Into<String>) -> Self {
        WarehouseConfig {
            default_service: default_service.into(),
            default_location: None,
            default_bucket: None,
            local: LocalSettings::default(),
            s3: S3Settings::default(),
        }
    }

    pub fn with_default_location(mut self, location: impl Into<String>) -> Self {
        self.default_location = Some(location.into());
        self
    }

    pub fn with_default_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.default_bucket = Some(bucket.into());
        self
    }

    pub fn with_local_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.local.root = root.into();
        self
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an explicit set of variables instead of the process environment.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Result<Self, anyhow::Error>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let default_service = non_empty("DEFAULT_SERVICE")
            .map(|s| s.trim().to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("DEFAULT_SERVICE must be set"))?;

        let config = WarehouseConfig {
            default_service,
            default_location: non_empty("DEFAULT_LOCATION"),
            default_bucket: non_empty("DEFAULT_BUCKET"),
            local: LocalSettings {
                root: non_empty("LOCAL_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(LOCAL_STORAGE_PATH)),
                base_url: non_empty("LOCAL_STORAGE_BASE_URL")
                    .unwrap_or_else(|| LOCAL_STORAGE_BASE_URL.to_string()),
            },
            s3: S3Settings {
                endpoint: non_empty("S3_ENDPOINT"),
                access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
                secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.default_service.trim().is_empty() {
            return Err(anyhow::anyhow!("DEFAULT_SERVICE must not be empty"));
        }

        let base_url = &self.local.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "LOCAL_STORAGE_BASE_URL must start with http:// or https://"
            ));
        }

        if self.s3.access_key_id.is_some() != self.s3.secret_access_key.is_some() {
            return Err(anyhow::anyhow!(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together"
            ));
        }

        Ok(())
    }
}
