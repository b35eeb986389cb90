//! Warehouse Storage Library
//!
//! A uniform Service / Bucket / Cubby model over heterogeneous object stores.
//! It includes the storage traits, the content-encoding pipeline, the local
//! filesystem and S3 backends, the backend registry and the [`Warehouse`]
//! front controller that resolves address strings into handles.
//!
//! # Model
//!
//! - A [`Service`] is one configured backend (`file`, `s3`).
//! - A [`Bucket`] is a named collection of objects at a location.
//! - A [`Cubby`] is a single stored object. Cubbies carry an explicit
//!   attribute cache: every accessor for remote state takes a `reload` flag.
//!
//! # Content encoding
//!
//! Encoding is a property of the key, not of the call: once a cubby records
//! `Content-Encoding: gzip`, every later `store` compresses before upload and
//! every `retrieve` decompresses after download.

pub mod attributes;
pub mod codec;
pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;
pub mod transfer;
pub mod warehouse;

// Re-export commonly used types
pub use attributes::{AttributeCache, Cached, Metadata, ObjectAttributes};
pub use factory::{ServiceFactory, ServiceRegistry};
#[cfg(feature = "storage-local")]
pub use local::{BaseUrlGenerator, LocalBucket, LocalCubby, LocalService, StaticUrlGenerator};
#[cfg(feature = "storage-s3")]
pub use s3::{S3Bucket, S3Cubby, S3Service};
pub use traits::{Bucket, Cubby, CubbyOptions, Service, StorageError, StorageResult};
pub use transfer::{CopyTarget, Destination, RawObject, Source};
pub use warehouse::{Resolved, Warehouse};
pub use warehouse_core::{ResourceAddress, ServiceKind, WarehouseConfig};
