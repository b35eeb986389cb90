//! Backend registry
//!
//! Maps a backend id (`file`, `s3`) to a factory that builds a configured
//! [`Service`]. Service instances are cached per id: the S3 client holds
//! connection state worth reusing, and a cached local service costs nothing.
//! Use [`ServiceRegistry::create`] to bypass the cache.

#[cfg(feature = "storage-local")]
use crate::local::LocalService;
#[cfg(feature = "storage-s3")]
use crate::s3::S3Service;
use crate::traits::{Service, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use warehouse_core::{ServiceKind, WarehouseConfig};

/// Builds a configured service for one backend id.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    fn id(&self) -> &str;

    /// `location` overrides the configured default location.
    async fn create(
        &self,
        config: &WarehouseConfig,
        location: Option<&str>,
    ) -> StorageResult<Arc<dyn Service>>;
}

fn effective_location(config: &WarehouseConfig, location: Option<&str>) -> Option<String> {
    location
        .filter(|l| !l.is_empty())
        .map(String::from)
        .or_else(|| config.default_location.clone())
}

#[cfg(feature = "storage-local")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalServiceFactory;

#[cfg(feature = "storage-local")]
#[async_trait]
impl ServiceFactory for LocalServiceFactory {
    fn id(&self) -> &str {
        ServiceKind::File.id()
    }

    async fn create(
        &self,
        config: &WarehouseConfig,
        location: Option<&str>,
    ) -> StorageResult<Arc<dyn Service>> {
        let service =
            LocalService::from_settings(&config.local, effective_location(config, location))
                .await?;
        Ok(Arc::new(service))
    }
}

#[cfg(feature = "storage-s3")]
#[derive(Debug, Clone, Copy, Default)]
pub struct S3ServiceFactory;

#[cfg(feature = "storage-s3")]
#[async_trait]
impl ServiceFactory for S3ServiceFactory {
    fn id(&self) -> &str {
        ServiceKind::S3.id()
    }

    async fn create(
        &self,
        config: &WarehouseConfig,
        location: Option<&str>,
    ) -> StorageResult<Arc<dyn Service>> {
        let service = S3Service::new(&config.s3, effective_location(config, location)).await?;
        Ok(Arc::new(service))
    }
}

/// Backend id -> factory, plus one cached service per id.
#[derive(Default)]
pub struct ServiceRegistry {
    factories: HashMap<String, Arc<dyn ServiceFactory>>,
    instances: Mutex<HashMap<String, Arc<dyn Service>>>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every backend compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "storage-local")]
        registry.register(Arc::new(LocalServiceFactory));
        #[cfg(feature = "storage-s3")]
        registry.register(Arc::new(S3ServiceFactory));
        registry
    }

    /// Register `factory` under its id, replacing any previous one.
    pub fn register(&mut self, factory: Arc<dyn ServiceFactory>) {
        let id = factory.id().to_string();
        self.instances.get_mut().remove(&id);
        self.factories.insert(id, factory);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn factory(&self, id: &str) -> StorageResult<&Arc<dyn ServiceFactory>> {
        self.factories.get(id).ok_or_else(|| {
            if ServiceKind::ALL.iter().any(|kind| kind.id() == id) {
                tracing::warn!(backend = %id, "Backend not registered or its feature is disabled");
            }
            StorageError::UnknownBackend(id.to_string())
        })
    }

    /// The cached service for `id`, built on first use.
    pub async fn service(
        &self,
        id: &str,
        config: &WarehouseConfig,
    ) -> StorageResult<Arc<dyn Service>> {
        let factory = self.factory(id)?;

        let mut instances = self.instances.lock().await;
        if let Some(service) = instances.get(id) {
            return Ok(Arc::clone(service));
        }

        let service = factory.create(config, None).await?;
        tracing::info!(backend = %id, "Storage service initialized");
        instances.insert(id.to_string(), Arc::clone(&service));
        Ok(service)
    }

    /// A fresh, uncached service for `id` with an optional location override.
    pub async fn create(
        &self,
        id: &str,
        config: &WarehouseConfig,
        location: Option<&str>,
    ) -> StorageResult<Arc<dyn Service>> {
        self.factory(id)?.create(config, location).await
    }
}

impl Debug for ServiceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ServiceRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}
