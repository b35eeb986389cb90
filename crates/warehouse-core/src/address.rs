//! Resource address parsing
//!
//! Grammar:
//!
//! ```text
//! address        = bucket-address ["/" key]
//! bucket-address = backend-id "://" [location] "/" bucket-name
//! backend-id     = 1*(ALPHA / DIGIT)
//! location       = *(any char except "/")
//! bucket-name    = 1*(any char except "/")
//! key            = 1*(any char)
//! ```
//!
//! When an input could be read both as a bucket address and as a bucket
//! address followed by a key, the longer (bucket + key) reading wins.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

const SCHEME_SEPARATOR: &str = "://";

/// Address parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Address {0:?} is missing the '://' separator")]
    MissingSeparator(String),

    #[error("Address {address:?} has an invalid backend id {backend:?}")]
    InvalidBackend { address: String, backend: String },

    #[error("Address {0:?} does not name a bucket")]
    MissingBucket(String),

    #[error("Address {0:?} ends with '/' but has no key")]
    EmptyKey(String),
}

/// A parsed `<backend>://<location>/<bucket>[/<key>]` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceAddress {
    pub backend: String,
    /// Empty when the address carries no location.
    pub location: String,
    pub bucket: String,
    pub key: Option<String>,
}

impl ResourceAddress {
    /// Address of a bucket (no key).
    pub fn bucket(
        backend: impl Into<String>,
        location: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        ResourceAddress {
            backend: backend.into(),
            location: location.into(),
            bucket: bucket.into(),
            key: None,
        }
    }

    /// Same bucket, addressing `key` inside it.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The bucket this address lives in, without the key.
    pub fn bucket_address(&self) -> Self {
        ResourceAddress {
            key: None,
            ..self.clone()
        }
    }

    /// Location as an optional value; the empty string means "not given".
    pub fn location(&self) -> Option<&str> {
        Some(self.location.as_str()).filter(|l| !l.is_empty())
    }

    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let (backend, rest) = input
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| AddressError::MissingSeparator(input.to_string()))?;

        if backend.is_empty() || !backend.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AddressError::InvalidBackend {
                address: input.to_string(),
                backend: backend.to_string(),
            });
        }

        // The location runs up to the first '/', which must exist because a
        // bucket name is mandatory.
        let (location, path) = rest
            .split_once('/')
            .ok_or_else(|| AddressError::MissingBucket(input.to_string()))?;

        let (bucket, key) = match path.split_once('/') {
            Some((bucket, key)) => (bucket, Some(key)),
            None => (path, None),
        };

        if bucket.is_empty() {
            return Err(AddressError::MissingBucket(input.to_string()));
        }

        let key = match key {
            Some("") => return Err(AddressError::EmptyKey(input.to_string())),
            Some(key) => Some(key.to_string()),
            None => None,
        };

        Ok(ResourceAddress {
            backend: backend.to_string(),
            location: location.to_string(),
            bucket: bucket.to_string(),
            key,
        })
    }
}

impl FromStr for ResourceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceAddress::parse(s)
    }
}

impl Display for ResourceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{}{}{}/{}",
            self.backend, SCHEME_SEPARATOR, self.location, self.bucket
        )?;
        if let Some(ref key) = self.key {
            write!(f, "/{}", key)?;
        }
        Ok(())
    }
}
