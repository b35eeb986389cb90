//! Storage abstraction traits
//!
//! This module defines the three traits every backend implements: [`Service`]
//! produces buckets, [`Bucket`] produces and lists cubbies, and [`Cubby`] moves
//! bytes. The content-encoding pipeline lives in the provided methods of
//! [`Cubby`] so that both backends apply it identically; implementations only
//! supply the raw transport (`put_object`, `get_object`, `refresh`, ...).

use crate::attributes::{AttributeCache, Cached, Metadata, ObjectAttributes};
use crate::codec;
use crate::keys;
use crate::transfer::{CopyTarget, Destination, RawObject, Source};
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::time::Duration;
use thiserror::Error;
use warehouse_core::{AddressError, ResourceAddress};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    AddressSyntax(#[from] AddressError),

    #[error("No storage service registered for {0:?}")]
    UnknownBackend(String),

    #[error("Service {service} requires a location but none was given or configured")]
    MissingLocation { service: String },

    #[error("No bucket name given and no default bucket configured")]
    MissingDefaultBucket,

    #[error("Warehouse used before it was initialized")]
    NotInitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cubby {0} has no ACL set; rewriting its attributes would drop the access policy")]
    MissingAcl(String),

    #[error("Destination stream is already closed")]
    AlreadyClosed,

    #[error("Cannot copy {from} to {to}: copies must stay within one backend")]
    CrossBackendCopy { from: String, to: String },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Content encoding error: {0}")]
    Encoding(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Provider(Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    /// Wrap an error returned by the underlying provider SDK.
    pub fn provider<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Provider(Box::new(err))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A configured storage backend.
#[async_trait]
pub trait Service: Send + Sync + Debug {
    /// Backend identifier used in addresses, e.g. `file` or `s3`.
    fn id(&self) -> &str;

    fn default_location(&self) -> Option<&str>;

    fn requires_location(&self) -> bool;

    /// Resolve the location for a bucket: the argument, then the service
    /// default. Empty strings count as "not given".
    fn resolve_location(&self, location: Option<&str>) -> StorageResult<Option<String>> {
        let resolved = location
            .filter(|l| !l.is_empty())
            .or_else(|| self.default_location().filter(|l| !l.is_empty()))
            .map(String::from);

        if resolved.is_none() && self.requires_location() {
            return Err(StorageError::MissingLocation {
                service: self.id().to_string(),
            });
        }

        Ok(resolved)
    }

    /// Get a handle on bucket `name`, creating it on the backend if needed.
    async fn bucket(&self, name: &str, location: Option<&str>) -> StorageResult<Box<dyn Bucket>>;
}

/// Per-handle options for a cubby.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CubbyOptions {
    /// Content type to record on the next `store`.
    pub content_type: Option<String>,
    /// Access policy in the backend's vocabulary, e.g. `public-read`.
    pub acl: Option<String>,
}

impl CubbyOptions {
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = Some(acl.into());
        self
    }
}

/// A named collection of objects at a location.
///
/// Equality is structural over `(service id, location, name)`.
#[async_trait]
pub trait Bucket: Send + Sync + Debug {
    fn service_id(&self) -> &str;

    fn name(&self) -> &str;

    /// Empty when the bucket has no location.
    fn location(&self) -> &str;

    fn address(&self) -> ResourceAddress {
        ResourceAddress::bucket(self.service_id(), self.location(), self.name())
    }

    /// Get a handle on the object stored under `key`.
    ///
    /// This does not imply the object exists.
    async fn cubby(&self, key: &str, options: CubbyOptions) -> StorageResult<Box<dyn Cubby>>;

    /// Remove the bucket. Irreversible.
    async fn delete(&self) -> StorageResult<()>;

    /// List cubbies whose keys start with `prefix`, at most `max_keys` of them.
    ///
    /// Ordering is backend-defined.
    async fn list(
        &self,
        prefix: Option<&str>,
        max_keys: Option<usize>,
    ) -> StorageResult<Vec<Box<dyn Cubby>>>;
}

impl PartialEq for dyn Bucket {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Display for dyn Bucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.address())
    }
}

/// A single stored object.
///
/// Equality is structural over `(bucket, key)`.
#[async_trait]
pub trait Cubby: Send + Sync + Debug {
    fn service_id(&self) -> &str;

    fn bucket_name(&self) -> &str;

    fn location(&self) -> &str;

    fn key(&self) -> &str;

    /// Content type requested for this handle, if any.
    fn content_type(&self) -> Option<&str>;

    fn acl(&self) -> Option<&str>;

    fn cache(&self) -> &AttributeCache;

    fn cache_mut(&mut self) -> &mut AttributeCache;

    fn as_any(&self) -> &dyn Any;

    fn address(&self) -> ResourceAddress {
        ResourceAddress::bucket(self.service_id(), self.location(), self.bucket_name())
            .with_key(self.key())
    }

    /// Extension of the final key segment, without the dot.
    fn extension(&self) -> &str {
        keys::extension(self.key())
    }

    async fn exists(&self) -> StorageResult<bool>;

    /// Remove the object. Returns whether it is absent afterwards.
    async fn delete(&mut self) -> StorageResult<bool>;

    /// Locator for the object; `None` means no expiration.
    async fn url(&self, expiration: Option<Duration>) -> StorageResult<String>;

    /// Fetch size and attributes from the backend into the cache.
    ///
    /// Fails with [`StorageError::NotFound`] when the object does not exist.
    async fn refresh(&mut self) -> StorageResult<()>;

    /// Write raw (already encoded) bytes, replacing the object wholesale.
    async fn put_object(&mut self, body: Bytes, attributes: &ObjectAttributes)
        -> StorageResult<()>;

    /// Read raw (still encoded) bytes.
    async fn get_object(&mut self) -> StorageResult<RawObject>;

    /// Rewrite the full attribute set in place, keeping the content.
    async fn replace_attributes(&mut self, attributes: &ObjectAttributes) -> StorageResult<()>;

    /// Handle on another key in the same bucket.
    async fn sibling(&self, key: &str) -> StorageResult<Box<dyn Cubby>>;

    /// Backend-native copy of content and attributes onto `dest`.
    async fn copy_into(&self, dest: &dyn Cubby) -> StorageResult<()>;

    /// Size in bytes of the stored (encoded) content.
    async fn filesize(&mut self, reload: bool) -> StorageResult<u64> {
        if reload || !self.cache().size.is_fetched() {
            self.refresh().await?;
        }
        self.cache()
            .size
            .get()
            .copied()
            .ok_or_else(|| StorageError::NotFound(self.address().to_string()))
    }

    async fn attributes(&mut self, reload: bool) -> StorageResult<ObjectAttributes> {
        if !reload {
            if let Some(attributes) = self.cache().attributes() {
                return Ok(attributes);
            }
        }
        self.refresh().await?;
        self.cache()
            .attributes()
            .ok_or_else(|| StorageError::NotFound(self.address().to_string()))
    }

    async fn metadata(&mut self, reload: bool) -> StorageResult<Metadata> {
        if !reload {
            if let Some(metadata) = self.cache().metadata.get() {
                return Ok(metadata.clone());
            }
        }
        Ok(self.attributes(true).await?.metadata)
    }

    /// Replace the whole custom metadata set (not a merge).
    async fn set_metadata(&mut self, metadata: Metadata) -> StorageResult<Metadata> {
        let mut attributes = self.attributes(true).await?;
        attributes.metadata = metadata;
        self.replace_attributes(&attributes).await?;
        let metadata = attributes.metadata.clone();
        self.cache_mut().store_attributes(attributes);
        Ok(metadata)
    }

    async fn mimetype(&mut self, reload: bool) -> StorageResult<Option<String>> {
        if !reload {
            if let Some(content_type) = self.cache().content_type.get() {
                return Ok(content_type.clone());
            }
        }
        Ok(self.attributes(true).await?.content_type)
    }

    /// Change the recorded content type, keeping the content encoding.
    async fn set_mimetype(&mut self, value: &str) -> StorageResult<String> {
        self.require_acl()?;
        let mut attributes = self.attributes(true).await?;
        attributes.content_type = Some(value.to_string());
        self.replace_attributes(&attributes).await?;
        self.cache_mut().store_attributes(attributes);
        Ok(value.to_string())
    }

    async fn content_encoding(&mut self, reload: bool) -> StorageResult<Option<String>> {
        if !reload {
            if let Some(encoding) = self.cache().content_encoding.get() {
                return Ok(encoding.clone());
            }
        }
        Ok(self.attributes(true).await?.content_encoding)
    }

    /// Change the recorded content encoding, keeping the content type.
    ///
    /// Only the attribute changes; content already stored is not re-encoded.
    async fn set_content_encoding(&mut self, value: &str) -> StorageResult<String> {
        self.require_acl()?;
        let mut attributes = self.attributes(true).await?;
        attributes.content_encoding = Some(value.to_string());
        self.replace_attributes(&attributes).await?;
        self.cache_mut().store_attributes(attributes);
        Ok(value.to_string())
    }

    /// Rewriting attributes copies the object onto itself, which resets the
    /// access policy on providers that do not carry it over.
    fn require_acl(&self) -> StorageResult<()> {
        match self.acl() {
            Some(_) => Ok(()),
            None => Err(StorageError::MissingAcl(self.address().to_string())),
        }
    }

    /// Store `source`, replacing any previous content.
    ///
    /// If the object already exists, its content type is kept unless this
    /// handle requests a new one, and its content encoding is re-applied to
    /// the new bytes.
    async fn store(&mut self, source: Source<'_>) -> StorageResult<()> {
        let data = source.into_bytes().await?;

        let existing = match self.refresh().await {
            Ok(()) => self.cache().attributes(),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let content_type = self
            .content_type()
            .map(String::from)
            .or_else(|| existing.as_ref().and_then(|a| a.content_type.clone()));
        let content_encoding = existing.and_then(|a| a.content_encoding);

        let body = codec::encode(content_encoding.as_deref(), data)?;
        let size = body.len() as u64;

        let attributes = ObjectAttributes {
            content_type,
            content_encoding,
            metadata: Metadata::new(),
        };

        self.put_object(body, &attributes).await?;

        let cache = self.cache_mut();
        cache.size = Cached::Fetched(size);
        cache.store_attributes(attributes);

        Ok(())
    }

    /// Retrieve the full decoded content into memory.
    async fn retrieve(&mut self) -> StorageResult<Bytes> {
        let raw = self.get_object().await?;
        self.cache_mut().content_encoding = Cached::Fetched(raw.content_encoding.clone());
        codec::decode(raw.content_encoding.as_deref(), raw.body)
    }

    /// Retrieve the decoded content into `destination`.
    async fn retrieve_to(&mut self, destination: Destination<'_>) -> StorageResult<()> {
        let data = self.retrieve().await?;
        let key = self.key().to_string();
        destination.write(&key, data).await
    }

    /// Copy content and attributes. Copies never cross backends; use
    /// `retrieve` + `store` for that. Copying onto the same object is a no-op.
    async fn copy_to(&self, target: CopyTarget<'_>) -> StorageResult<()> {
        let dest = match target {
            CopyTarget::Key(key) => self.address().bucket_address().with_key(key),
            CopyTarget::Cubby(dest) => dest.address(),
        };
        if dest == self.address() {
            return Ok(());
        }

        match target {
            CopyTarget::Key(key) => {
                let dest = self.sibling(key).await?;
                self.copy_into(dest.as_ref()).await
            }
            CopyTarget::Cubby(dest) => {
                if dest.service_id() != self.service_id() {
                    return Err(StorageError::CrossBackendCopy {
                        from: self.address().to_string(),
                        to: dest.address().to_string(),
                    });
                }
                self.copy_into(dest).await
            }
        }
    }

    /// `copy_to` followed by deleting this object.
    async fn move_to(&mut self, target: CopyTarget<'_>) -> StorageResult<()> {
        let dest = match target {
            CopyTarget::Key(key) => self.address().bucket_address().with_key(key),
            CopyTarget::Cubby(dest) => dest.address(),
        };
        if dest == self.address() {
            return Ok(());
        }

        self.copy_to(target).await?;
        self.delete().await?;
        Ok(())
    }
}

impl PartialEq for dyn Cubby {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Display for dyn Cubby {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.address())
    }
}
