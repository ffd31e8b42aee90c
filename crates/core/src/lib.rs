//! drnav core types: schema versions, per-version raw resources and the canonical service model.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod resource;
pub mod service;

pub use resource::{
    OptionsV1, OptionsV2, OptionsV3, ParametersV2, ParametersV3, RawResource, SiteManager, SiteManagerV1,
    SiteManagerV2, SiteManagerV3, Spec, Status,
};
pub use service::{apply_http_scheme, service_name, CanonicalService, Parameters, ServiceRegistry};

/// Module value every version falls back to when none is given.
pub const STATEFUL_MODULE: &str = "stateful";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("API version {0} is not supported")]
    UnsupportedVersion(String),
    #[error("object has no apiVersion")]
    MissingApiVersion,
    #[error("decoding {version} object: {reason}")]
    Decode { version: SchemaVersion, reason: String },
    #[error("encoding {version} object: {reason}")]
    Encode { version: SchemaVersion, reason: String },
}

/// Schema versions of the SiteManager resource. `V3` is the hub every other version converts through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V1,
    V2,
    V3,
}

impl SchemaVersion {
    pub const HUB: SchemaVersion = SchemaVersion::V3;

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => "v1",
            SchemaVersion::V2 => "v2",
            SchemaVersion::V3 => "v3",
        }
    }

    pub fn is_hub(&self) -> bool { *self == Self::HUB }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Accepts a bare version (`v2`) or a full apiVersion (`netcracker.com/v2`).
impl FromStr for SchemaVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.rsplit('/').next().unwrap_or(s);
        match bare {
            "v1" => Ok(SchemaVersion::V1),
            "v2" => Ok(SchemaVersion::V2),
            "v3" => Ok(SchemaVersion::V3),
            _ => Err(CoreError::UnsupportedVersion(s.to_string())),
        }
    }
}

/// The two object families that coexist during migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Older group, served in v1/v2/v3 and stored as v3.
    Legacy,
    /// Newer group, v3 only.
    Current,
}

/// Group/kind coordinates of both families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Families {
    pub legacy_group: String,
    pub current_group: String,
    pub kind: String,
    pub plural: String,
}

impl Default for Families {
    fn default() -> Self {
        Self {
            legacy_group: "netcracker.com".into(),
            current_group: "qubership.org".into(),
            kind: "SiteManager".into(),
            plural: "sitemanagers".into(),
        }
    }
}

impl Families {
    pub fn group(&self, family: Family) -> &str {
        match family {
            Family::Legacy => &self.legacy_group,
            Family::Current => &self.current_group,
        }
    }

    pub fn api_version(&self, family: Family, version: SchemaVersion) -> String {
        format!("{}/{}", self.group(family), version)
    }

    /// Resolve an apiVersion string back to its family and schema version.
    pub fn classify(&self, api_version: &str) -> Result<(Family, SchemaVersion), CoreError> {
        let (group, _) = api_version
            .split_once('/')
            .ok_or_else(|| CoreError::UnsupportedVersion(api_version.to_string()))?;
        let version: SchemaVersion = api_version.parse()?;
        let family = if group == self.legacy_group {
            Family::Legacy
        } else if group == self.current_group {
            Family::Current
        } else {
            return Err(CoreError::UnsupportedVersion(api_version.to_string()));
        };
        Ok((family, version))
    }
}

pub mod prelude {
    pub use super::{
        CanonicalService, CoreError, Families, Family, RawResource, SchemaVersion, ServiceRegistry,
        STATEFUL_MODULE,
    };
}
