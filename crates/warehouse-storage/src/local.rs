use crate::attributes::{AttributeCache, ObjectAttributes};
use crate::keys;
use crate::traits::{Bucket, Cubby, CubbyOptions, Service, StorageError, StorageResult};
use crate::transfer::RawObject;
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use warehouse_core::{LocalSettings, ServiceKind};

/// Attribute sidecars live under `<root>/.warehouse/<bucket>/<key>.json`.
const SIDECAR_DIR: &str = ".warehouse";
const SIDECAR_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".warehouse-tmp";

/// Turns a path relative to the storage root into a public locator.
///
/// The local backend does not serve files itself; whatever serves the root
/// directory (a static-file handler, a CDN) decides what the URL looks like.
pub trait StaticUrlGenerator: Send + Sync + Debug {
    fn static_url(&self, relative_path: &str) -> StorageResult<String>;
}

/// `{base_url}/{relative_path}`, with each path segment percent-encoded.
#[derive(Debug, Clone)]
pub struct BaseUrlGenerator {
    base_url: String,
}

impl BaseUrlGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        BaseUrlGenerator {
            base_url: base_url.into(),
        }
    }
}

impl StaticUrlGenerator for BaseUrlGenerator {
    fn static_url(&self, relative_path: &str) -> StorageResult<String> {
        let encoded: Vec<_> = relative_path
            .split('/')
            .map(urlencoding::encode)
            .collect();
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            encoded.join("/")
        ))
    }
}

/// Local filesystem storage service
#[derive(Clone, Debug)]
pub struct LocalService {
    root: PathBuf,
    default_location: Option<String>,
    urls: Arc<dyn StaticUrlGenerator>,
}

impl LocalService {
    /// Create a new LocalService instance
    ///
    /// # Arguments
    /// * `root` - Root directory; created if absent (e.g., "/var/lib/warehouse")
    /// * `urls` - Generator for static-file locators
    /// * `default_location` - Recorded on buckets; the filesystem ignores it
    pub async fn new(
        root: impl Into<PathBuf>,
        urls: Arc<dyn StaticUrlGenerator>,
        default_location: Option<String>,
    ) -> StorageResult<Self> {
        let root = root.into();

        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalService {
            root,
            default_location,
            urls,
        })
    }

    pub async fn from_settings(
        settings: &LocalSettings,
        default_location: Option<String>,
    ) -> StorageResult<Self> {
        let urls = Arc::new(BaseUrlGenerator::new(settings.base_url.clone()));
        Self::new(settings.root.clone(), urls, default_location).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn open_bucket(
        &self,
        name: &str,
        location: Option<&str>,
    ) -> StorageResult<LocalBucket> {
        keys::validate_bucket_name(name)?;
        let location = self.resolve_location(location)?.unwrap_or_default();
        LocalBucket::open(self.clone(), name, location).await
    }
}

impl Display for LocalService {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}://", self.id())
    }
}

#[async_trait]
impl Service for LocalService {
    fn id(&self) -> &str {
        ServiceKind::File.id()
    }

    fn default_location(&self) -> Option<&str> {
        self.default_location.as_deref()
    }

    fn requires_location(&self) -> bool {
        ServiceKind::File.requires_location()
    }

    async fn bucket(&self, name: &str, location: Option<&str>) -> StorageResult<Box<dyn Bucket>> {
        Ok(Box::new(self.open_bucket(name, location).await?))
    }
}

/// A directory under the service root
#[derive(Clone, Debug)]
pub struct LocalBucket {
    service: LocalService,
    name: String,
    location: String,
    path: PathBuf,
}

impl LocalBucket {
    async fn open(service: LocalService, name: &str, location: String) -> StorageResult<Self> {
        let path = service.root.join(name);
        fs::create_dir_all(&path).await?;

        tracing::debug!(bucket = %name, path = %path.display(), "Local bucket opened");

        Ok(LocalBucket {
            service,
            name: name.to_string(),
            location,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sidecar_root(&self) -> PathBuf {
        self.service.root.join(SIDECAR_DIR).join(&self.name)
    }

    pub async fn open_cubby(&self, key: &str, options: CubbyOptions) -> StorageResult<LocalCubby> {
        keys::validate_key(key)?;
        let cubby = LocalCubby::handle(self.clone(), key, options);
        // Storing implies the path exists, so the directory is created up front.
        if let Some(parent) = cubby.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(cubby)
    }

    async fn walk(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && !path.to_string_lossy().ends_with(TEMP_SUFFIX) {
                    if let Ok(relative) = path.strip_prefix(&self.path) {
                        let key: Vec<_> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        keys.push(key.join("/"));
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

impl PartialEq for LocalBucket {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for LocalBucket {}

impl Display for LocalBucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.address())
    }
}

#[async_trait]
impl Bucket for LocalBucket {
    fn service_id(&self) -> &str {
        self.service.id()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn cubby(&self, key: &str, options: CubbyOptions) -> StorageResult<Box<dyn Cubby>> {
        Ok(Box::new(self.open_cubby(key, options).await?))
    }

    async fn delete(&self) -> StorageResult<()> {
        fs::remove_dir_all(&self.path).await?;

        match fs::remove_dir_all(self.sidecar_root()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            bucket = %self.name,
            path = %self.path.display(),
            "Local bucket deleted"
        );

        Ok(())
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        max_keys: Option<usize>,
    ) -> StorageResult<Vec<Box<dyn Cubby>>> {
        let prefix = prefix.unwrap_or("");
        let cubbies = self
            .walk()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .take(max_keys.unwrap_or(usize::MAX))
            .map(|key| {
                Box::new(LocalCubby::handle(self.clone(), &key, CubbyOptions::default()))
                    as Box<dyn Cubby>
            })
            .collect();
        Ok(cubbies)
    }
}

/// A file inside a bucket directory
#[derive(Clone, Debug)]
pub struct LocalCubby {
    bucket: LocalBucket,
    key: String,
    content_type: Option<String>,
    acl: Option<String>,
    path: PathBuf,
    cache: AttributeCache,
}

impl LocalCubby {
    fn handle(bucket: LocalBucket, key: &str, options: CubbyOptions) -> Self {
        let path = bucket.path.join(key);
        LocalCubby {
            bucket,
            key: key.to_string(),
            content_type: options.content_type,
            acl: options.acl,
            path,
            cache: AttributeCache::default(),
        }
    }

    /// Absolute path of the stored file.
    pub fn filepath(&self) -> &Path {
        &self.path
    }

    /// Path relative to the service root, as handed to the URL generator.
    pub fn keypath(&self) -> String {
        format!("{}/{}", self.bucket.name, self.key)
    }

    /// One flat file per key, so `a` and `a.json/b` never share a path.
    fn sidecar_path(&self) -> PathBuf {
        self.bucket
            .sidecar_root()
            .join(format!("{}{}", urlencoding::encode(&self.key), SIDECAR_SUFFIX))
    }

    async fn read_sidecar(&self) -> StorageResult<ObjectAttributes> {
        match read_if_present(&self.sidecar_path()).await? {
            Some(raw) => serde_json::from_slice(&raw).map_err(|e| {
                StorageError::IoError(std::io::Error::new(ErrorKind::InvalidData, e))
            }),
            None => Ok(ObjectAttributes::default()),
        }
    }

    async fn write_sidecar(&self, attributes: &ObjectAttributes) -> StorageResult<()> {
        let raw = sidecar_bytes(attributes)?;
        self.commit_sidecar(raw.as_deref()).await?;
        Ok(())
    }

    /// Replace the sidecar with `raw`, or remove it when `None`.
    async fn commit_sidecar(&self, raw: Option<&[u8]>) -> std::io::Result<()> {
        let path = self.sidecar_path();
        let Some(raw) = raw else {
            return remove_if_present(&path).await;
        };

        let temp_path = stage_file(&path, raw).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Move staged content into place together with its sidecar. When the
    /// content cannot be moved, the previous sidecar is put back.
    async fn commit_with_sidecar(
        &self,
        staged: &Path,
        sidecar: Option<&[u8]>,
    ) -> std::io::Result<()> {
        let previous = read_if_present(&self.sidecar_path()).await?;
        self.commit_sidecar(sidecar).await?;

        if let Err(e) = fs::rename(staged, &self.path).await {
            if let Err(restore) = self.commit_sidecar(previous.as_deref()).await {
                tracing::error!(
                    error = %restore,
                    key = %self.key,
                    "Local storage sidecar restore failed"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn not_found(&self) -> StorageError {
        StorageError::NotFound(self.address().to_string())
    }
}

impl PartialEq for LocalCubby {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for LocalCubby {}

impl Display for LocalCubby {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
impl Cubby for LocalCubby {
    fn service_id(&self) -> &str {
        self.bucket.service_id()
    }

    fn bucket_name(&self) -> &str {
        &self.bucket.name
    }

    fn location(&self) -> &str {
        &self.bucket.location
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn acl(&self) -> Option<&str> {
        self.acl.as_deref()
    }

    fn cache(&self) -> &AttributeCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut AttributeCache {
        &mut self.cache
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn exists(&self) -> StorageResult<bool> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&mut self) -> StorageResult<bool> {
        let start = std::time::Instant::now();

        if self.exists().await? {
            fs::remove_file(&self.path).await?;
        }
        self.write_sidecar(&ObjectAttributes::default()).await?;
        self.cache.invalidate();

        let absent = !self.exists().await?;

        tracing::info!(
            path = %self.path.display(),
            key = %self.key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(absent)
    }

    async fn url(&self, _expiration: Option<Duration>) -> StorageResult<String> {
        self.bucket.service.urls.static_url(&self.keypath())
    }

    async fn refresh(&mut self) -> StorageResult<()> {
        let meta = match fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(self.not_found()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found()),
            Err(e) => return Err(e.into()),
        };
        let attributes = self.read_sidecar().await?;
        self.cache.store(meta.len(), attributes);
        Ok(())
    }

    async fn put_object(
        &mut self,
        body: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<()> {
        let size = body.len();
        let start = std::time::Instant::now();

        let sidecar = sidecar_bytes(attributes)?;

        // Content and sidecar are staged next to their targets and renamed,
        // so a failed store leaves the previous object in place.
        let written = async {
            let staged = stage_file(&self.path, &body).await?;
            if let Err(e) = self.commit_with_sidecar(&staged, sidecar.as_deref()).await {
                let _ = fs::remove_file(&staged).await;
                return Err(e);
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            tracing::error!(
                error = %e,
                path = %self.path.display(),
                key = %self.key,
                size_bytes = size,
                "Local storage store failed"
            );
            return Err(e.into());
        }

        tracing::info!(
            path = %self.path.display(),
            key = %self.key,
            size_bytes = size,
            content_encoding = ?attributes.content_encoding,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage store successful"
        );

        Ok(())
    }

    async fn get_object(&mut self) -> StorageResult<RawObject> {
        let start = std::time::Instant::now();

        let body = match fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found()),
            Err(e) => return Err(e.into()),
        };
        let attributes = self.read_sidecar().await?;

        tracing::info!(
            path = %self.path.display(),
            key = %self.key,
            size_bytes = body.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage retrieve successful"
        );

        Ok(RawObject {
            body: Bytes::from(body),
            content_encoding: attributes.content_encoding,
        })
    }

    async fn replace_attributes(&mut self, attributes: &ObjectAttributes) -> StorageResult<()> {
        if !self.exists().await? {
            return Err(self.not_found());
        }
        self.write_sidecar(attributes).await?;

        tracing::debug!(key = %self.key, "Local storage attributes replaced");
        Ok(())
    }

    async fn sibling(&self, key: &str) -> StorageResult<Box<dyn Cubby>> {
        let options = CubbyOptions {
            content_type: None,
            acl: self.acl.clone(),
        };
        Ok(Box::new(self.bucket.open_cubby(key, options).await?))
    }

    async fn copy_into(&self, dest: &dyn Cubby) -> StorageResult<()> {
        let dest = dest
            .as_any()
            .downcast_ref::<LocalCubby>()
            .ok_or_else(|| StorageError::CrossBackendCopy {
                from: self.address().to_string(),
                to: dest.address().to_string(),
            })?;

        if !self.exists().await? {
            return Err(self.not_found());
        }
        if dest.path == self.path {
            return Ok(());
        }

        let body = fs::read(&self.path).await?;
        let sidecar = sidecar_bytes(&self.read_sidecar().await?)?;

        let copied = async {
            let staged = stage_file(&dest.path, &body).await?;
            if let Err(e) = dest.commit_with_sidecar(&staged, sidecar.as_deref()).await {
                let _ = fs::remove_file(&staged).await;
                return Err(e);
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = copied {
            tracing::error!(
                error = %e,
                from_path = %self.path.display(),
                to_path = %dest.path.display(),
                "Local storage copy failed"
            );
            return Err(e.into());
        }

        tracing::info!(
            from_key = %self.key,
            to_key = %dest.key,
            from_path = %self.path.display(),
            to_path = %dest.path.display(),
            "Local storage copy successful"
        );

        Ok(())
    }
}

fn sidecar_bytes(attributes: &ObjectAttributes) -> StorageResult<Option<Vec<u8>>> {
    if attributes.is_empty() {
        return Ok(None);
    }
    serde_json::to_vec(attributes)
        .map(Some)
        .map_err(|e| StorageError::IoError(std::io::Error::new(ErrorKind::InvalidData, e)))
}

async fn read_if_present(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Write `data` to a temp sibling of `path` and return the temp path.
/// Listings skip these files; nothing is left behind on failure.
async fn stage_file(path: &Path, data: &[u8]) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}{}", Uuid::new_v4(), TEMP_SUFFIX));
    let temp_path = path.with_file_name(name);

    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    match written {
        Ok(()) => Ok(temp_path),
        Err(e) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(e)
        }
    }
}
