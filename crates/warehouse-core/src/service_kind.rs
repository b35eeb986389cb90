use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Built-in backend identifiers
///
/// These are the ids the default registry knows how to construct. The
/// registry itself is keyed by plain strings, so additional backends can be
/// registered without extending this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    File,
    S3,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::File, ServiceKind::S3];

    /// Identifier used in addresses (`file://`, `s3://`).
    pub fn id(&self) -> &'static str {
        match self {
            ServiceKind::File => "file",
            ServiceKind::S3 => "s3",
        }
    }

    /// Whether buckets of this backend must be scoped to a location.
    pub fn requires_location(&self) -> bool {
        match self {
            ServiceKind::File => false,
            ServiceKind::S3 => true,
        }
    }
}

impl FromStr for ServiceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" | "local" => Ok(ServiceKind::File),
            "s3" => Ok(ServiceKind::S3),
            _ => Err(anyhow::anyhow!("Invalid storage service: {}", s)),
        }
    }
}

impl Display for ServiceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.id())
    }
}
