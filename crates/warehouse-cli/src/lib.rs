//! Command implementations behind the `warehouse` binary.
//!
//! Each function takes an initialized [`Warehouse`] and address strings, so
//! the binary only parses arguments and prints results.

use serde::Serialize;
use std::time::Duration;
use warehouse_storage::{CopyTarget, CubbyOptions, Metadata, StorageResult, Warehouse};

/// Initialize tracing for CLI binaries.
///
/// Events go to stderr so `get` can stream object content to stdout.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Destination argument of `cp` / `mv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyDestination {
    /// A full address, possibly in another bucket.
    Address(String),
    /// A key in the source bucket.
    Key(String),
}

impl CopyDestination {
    pub fn parse(raw: &str) -> Self {
        if raw.contains("://") {
            CopyDestination::Address(raw.to_string())
        } else {
            CopyDestination::Key(raw.to_string())
        }
    }
}

/// `None` and `0` both mean "no expiration".
pub fn expiration(seconds: Option<u64>) -> Option<Duration> {
    seconds.filter(|s| *s > 0).map(Duration::from_secs)
}

/// Output of `stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectStat {
    pub address: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub metadata: Metadata,
}

pub async fn stat(warehouse: &Warehouse, address: &str) -> StorageResult<ObjectStat> {
    let mut cubby = warehouse
        .resolve_cubby(address, CubbyOptions::default())
        .await?;
    let size_bytes = cubby.filesize(true).await?;
    let attributes = cubby.attributes(false).await?;
    tracing::debug!(address = %address, size_bytes, "Object stat");

    Ok(ObjectStat {
        address: cubby.to_string(),
        size_bytes,
        content_type: attributes.content_type,
        content_encoding: attributes.content_encoding,
        metadata: attributes.metadata,
    })
}

/// Addresses of the objects in the bucket at `address`.
pub async fn list(
    warehouse: &Warehouse,
    address: &str,
    prefix: Option<&str>,
    max_keys: Option<usize>,
) -> StorageResult<Vec<String>> {
    let bucket = warehouse.resolve_bucket(address).await?;
    let cubbies = bucket.list(prefix, max_keys).await?;
    tracing::debug!(address = %address, count = cubbies.len(), "Listed bucket");
    Ok(cubbies.iter().map(|c| c.to_string()).collect())
}

/// `cp` when `remove_source` is false, `mv` otherwise.
pub async fn transfer(
    warehouse: &Warehouse,
    source: &str,
    destination: &CopyDestination,
    remove_source: bool,
) -> StorageResult<()> {
    let mut cubby = warehouse
        .resolve_cubby(source, CubbyOptions::default())
        .await?;

    match destination {
        CopyDestination::Key(key) => {
            let target = CopyTarget::Key(key);
            if remove_source {
                cubby.move_to(target).await?;
            } else {
                cubby.copy_to(target).await?;
            }
        }
        CopyDestination::Address(address) => {
            let dest = warehouse
                .resolve_cubby(address, CubbyOptions::default())
                .await?;
            let target = CopyTarget::Cubby(dest.as_ref());
            if remove_source {
                cubby.move_to(target).await?;
            } else {
                cubby.copy_to(target).await?;
            }
        }
    }

    tracing::info!(
        source = %source,
        destination = ?destination,
        moved = remove_source,
        "Transfer completed"
    );
    Ok(())
}
