//! Warehouse Core Library
//!
//! Backend-independent vocabulary shared by every Warehouse component: the
//! resource address syntax and its parser, the built-in backend identifiers,
//! and the configuration surface read from the environment.
//!
//! # Address format
//!
//! ```text
//! <backend>://<location>/<bucket>[/<key...>]
//! ```
//!
//! `location` may be empty (`file:///bucket/key`); `key` is kept verbatim and
//! may contain further `/` separators.

pub mod address;
pub mod config;
pub mod service_kind;

// Re-export commonly used types
pub use address::{AddressError, ResourceAddress};
pub use config::{LocalSettings, S3Settings, WarehouseConfig};
pub use service_kind::ServiceKind;
