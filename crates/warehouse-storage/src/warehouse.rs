//! Front controller
//!
//! [`Warehouse`] owns a [`ServiceRegistry`] and the configuration, and turns
//! address strings into bucket or cubby handles:
//!
//! ```text
//! "s3://eu-west-1/media/photos/cat.png"
//!   -> parse        { backend: s3, location: eu-west-1, bucket: media, key: photos/cat.png }
//!   -> registry     S3Service
//!   -> service      S3Bucket "media" in eu-west-1
//!   -> bucket       S3Cubby "photos/cat.png"
//! ```

use crate::factory::ServiceRegistry;
use crate::traits::{Bucket, Cubby, CubbyOptions, Service, StorageError, StorageResult};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use warehouse_core::{ResourceAddress, ServiceKind, WarehouseConfig};

/// What an address resolved to.
#[derive(Debug)]
pub enum Resolved {
    Bucket(Box<dyn Bucket>),
    Cubby(Box<dyn Cubby>),
}

impl Resolved {
    pub fn into_bucket(self) -> StorageResult<Box<dyn Bucket>> {
        match self {
            Resolved::Bucket(bucket) => Ok(bucket),
            Resolved::Cubby(cubby) => Err(StorageError::InvalidArgument(format!(
                "{} names an object, not a bucket",
                cubby
            ))),
        }
    }

    pub fn into_cubby(self) -> StorageResult<Box<dyn Cubby>> {
        match self {
            Resolved::Cubby(cubby) => Ok(cubby),
            Resolved::Bucket(bucket) => Err(StorageError::InvalidArgument(format!(
                "{} names a bucket, not an object",
                bucket
            ))),
        }
    }
}

/// Registered ids are canonical (`file`), but configuration may use an alias (`local`).
fn canonical_id(id: &str) -> String {
    id.parse::<ServiceKind>()
        .map(|kind| kind.id().to_string())
        .unwrap_or_else(|_| id.to_string())
}

pub struct Warehouse {
    registry: ServiceRegistry,
    config: Option<WarehouseConfig>,
}

impl Warehouse {
    /// An uninitialized warehouse over `registry`; call [`Warehouse::init`] before use.
    pub fn new(registry: ServiceRegistry) -> Self {
        Warehouse {
            registry,
            config: None,
        }
    }

    pub fn from_config(config: WarehouseConfig) -> StorageResult<Self> {
        let mut warehouse = Warehouse::new(ServiceRegistry::with_defaults());
        warehouse.init(config)?;
        Ok(warehouse)
    }

    pub fn init(&mut self, config: WarehouseConfig) -> StorageResult<()> {
        config
            .validate()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        tracing::info!(
            default_service = %config.default_service,
            default_location = ?config.default_location,
            default_bucket = ?config.default_bucket,
            backends = ?self.registry.ids(),
            "Warehouse initialized"
        );

        self.config = Some(config);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> StorageResult<&WarehouseConfig> {
        self.config.as_ref().ok_or(StorageError::NotInitialized)
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn default_bucket(&self) -> Option<&str> {
        self.config.as_ref()?.default_bucket.as_deref()
    }

    pub fn default_location(&self) -> Option<&str> {
        self.config.as_ref()?.default_location.as_deref()
    }

    /// The service for `id`, or the configured default service.
    pub async fn service(&self, id: Option<&str>) -> StorageResult<Arc<dyn Service>> {
        let config = self.config()?;
        let id = canonical_id(id.unwrap_or(&config.default_service));
        self.registry.service(&id, config).await
    }

    /// Bucket `name` (or the default bucket) on the default service.
    pub async fn bucket(&self, name: Option<&str>) -> StorageResult<Box<dyn Bucket>> {
        let config = self.config()?;
        let name = name
            .or(config.default_bucket.as_deref())
            .ok_or(StorageError::MissingDefaultBucket)?;
        self.service(None).await?.bucket(name, None).await
    }

    /// Resolve an address string to a bucket or cubby handle.
    pub async fn resolve(&self, address: &str) -> StorageResult<Resolved> {
        self.resolve_with(address, CubbyOptions::default()).await
    }

    /// Like [`Warehouse::resolve`], applying `options` when the address names a cubby.
    pub async fn resolve_with(
        &self,
        address: &str,
        options: CubbyOptions,
    ) -> StorageResult<Resolved> {
        let parsed = ResourceAddress::parse(address)?;
        let service = self.service(Some(&parsed.backend)).await?;
        let bucket = service.bucket(&parsed.bucket, parsed.location()).await?;

        tracing::debug!(address = %parsed, "Address resolved");

        match parsed.key {
            Some(ref key) => Ok(Resolved::Cubby(bucket.cubby(key, options).await?)),
            None => Ok(Resolved::Bucket(bucket)),
        }
    }

    pub async fn resolve_bucket(&self, address: &str) -> StorageResult<Box<dyn Bucket>> {
        self.resolve(address).await?.into_bucket()
    }

    pub async fn resolve_cubby(
        &self,
        address: &str,
        options: CubbyOptions,
    ) -> StorageResult<Box<dyn Cubby>> {
        self.resolve_with(address, options).await?.into_cubby()
    }
}

impl Debug for Warehouse {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Warehouse")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_use_before_init() {
        let warehouse = Warehouse::new(ServiceRegistry::with_defaults());
        assert!(!warehouse.is_initialized());
        assert!(matches!(
            warehouse.bucket(Some("media")).await,
            Err(StorageError::NotInitialized)
        ));
        assert!(matches!(
            warehouse.resolve("file:///media").await,
            Err(StorageError::NotInitialized)
        ));
        assert_eq!(warehouse.default_bucket(), None);
    }

    #[tokio::test]
    async fn test_missing_default_bucket() {
        let warehouse = Warehouse::from_config(WarehouseConfig::new("file")).unwrap();
        assert!(matches!(
            warehouse.bucket(None).await,
            Err(StorageError::MissingDefaultBucket)
        ));
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let warehouse = Warehouse::from_config(WarehouseConfig::new("file")).unwrap();

        assert!(matches!(
            warehouse.resolve("not an address").await,
            Err(StorageError::AddressSyntax(_))
        ));
        assert!(matches!(
            warehouse.resolve("ftp://host/bucket/key").await,
            Err(StorageError::UnknownBackend(id)) if id == "ftp"
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = WarehouseConfig::new("file");
        config.local.base_url = "ftp://nope".to_string();
        assert!(matches!(
            Warehouse::from_config(config),
            Err(StorageError::ConfigError(_))
        ));
    }

    #[test]
    fn test_canonical_ids() {
        assert_eq!(canonical_id("local"), "file");
        assert_eq!(canonical_id("S3"), "s3");
        assert_eq!(canonical_id("custom"), "custom");
    }

    #[cfg(feature = "storage-local")]
    #[tokio::test]
    async fn test_resolve_local_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let config = WarehouseConfig::new("local")
            .with_local_root(dir.path())
            .with_default_bucket("media");
        let warehouse = Warehouse::from_config(config).unwrap();

        let bucket = warehouse.resolve_bucket("file:///media").await.unwrap();
        let default = warehouse.bucket(None).await.unwrap();
        assert!(*bucket == *default);
        assert_eq!(warehouse.default_bucket(), Some("media"));

        let cubby = warehouse
            .resolve_cubby("file:///media/a/b.txt", CubbyOptions::default())
            .await
            .unwrap();
        assert_eq!(cubby.key(), "a/b.txt");
        assert_eq!(cubby.bucket_name(), "media");
        assert!(dir.path().join("media/a").is_dir());

        assert!(warehouse.resolve_cubby("file:///media", CubbyOptions::default()).await.is_err());
    }
}
