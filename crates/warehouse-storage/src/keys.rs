//! Key and bucket name validation shared by the backends.
//!
//! Keys may contain `/` to form hierarchical namespaces. They must not be
//! empty, start with `/`, or contain a `..` segment.

use crate::traits::{StorageError, StorageResult};

pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "Storage key {:?} contains invalid path segments",
            key
        )));
    }
    Ok(())
}

pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return Err(StorageError::InvalidKey(format!(
            "Invalid bucket name {:?}",
            name
        )));
    }
    Ok(())
}

/// Substring after the last `.` of the final key segment, or `""`.
pub fn extension(key: &str) -> &str {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => "",
    }
}
