//! Object attributes and the per-handle attribute cache.
//!
//! Backend round-trips dominate the cost of every operation, so a cubby keeps
//! the last values it fetched. Each attribute carries its own freshness state;
//! accessors on [`crate::Cubby`] take a `reload` flag that decides between the
//! cached value and a new fetch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Custom key/value metadata.
pub type Metadata = BTreeMap<String, String>;

/// Attributes recorded alongside an object's content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl ObjectAttributes {
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.content_encoding.is_none() && self.metadata.is_empty()
    }
}

/// A value that is either not yet fetched or holds the last fetched value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cached<T> {
    #[default]
    Unfetched,
    Fetched(T),
}

impl<T> Cached<T> {
    pub fn is_fetched(&self) -> bool {
        matches!(self, Cached::Fetched(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Cached::Fetched(value) => Some(value),
            Cached::Unfetched => None,
        }
    }
}

/// Last-fetched remote state of a cubby.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeCache {
    pub size: Cached<u64>,
    pub content_type: Cached<Option<String>>,
    pub content_encoding: Cached<Option<String>>,
    pub metadata: Cached<Metadata>,
}

impl AttributeCache {
    /// Record a full fetch.
    pub fn store(&mut self, size: u64, attributes: ObjectAttributes) {
        self.size = Cached::Fetched(size);
        self.store_attributes(attributes);
    }

    /// Record the attribute set, leaving the size untouched.
    pub fn store_attributes(&mut self, attributes: ObjectAttributes) {
        self.content_type = Cached::Fetched(attributes.content_type);
        self.content_encoding = Cached::Fetched(attributes.content_encoding);
        self.metadata = Cached::Fetched(attributes.metadata);
    }

    /// The cached attribute set, if every attribute has been fetched.
    pub fn attributes(&self) -> Option<ObjectAttributes> {
        Some(ObjectAttributes {
            content_type: self.content_type.get()?.clone(),
            content_encoding: self.content_encoding.get()?.clone(),
            metadata: self.metadata.get()?.clone(),
        })
    }

    pub fn invalidate(&mut self) {
        *self = AttributeCache::default();
    }
}
