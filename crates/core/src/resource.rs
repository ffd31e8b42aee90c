//! Version-specific SiteManager shapes and the `RawResource` sum type over them.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{service_name, CoreError, SchemaVersion};

// Stored objects may carry explicit nulls for list fields.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Envelope shared by every version: metadata, `spec.sitemanager` options and status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "O: Deserialize<'de> + Default"))]
pub struct SiteManager<O> {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Spec<O>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: Status,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "O: Deserialize<'de> + Default"))]
pub struct Spec<O> {
    #[serde(default)]
    pub sitemanager: O,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub service_name: String,
}

/// v1: endpoints are flat fields next to the ordering lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsV1 {
    #[serde(default, deserialize_with = "null_as_default")]
    pub after: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub before: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sequence: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_standby_state_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_endpoint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub healthz_endpoint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ingress_endpoint: String,
}

/// v2: endpoints grouped under `parameters`, plus `module`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsV2 {
    #[serde(default, deserialize_with = "null_as_default")]
    pub module: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub after: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub before: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sequence: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_standby_state_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: ParametersV2,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersV2 {
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_endpoint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub healthz_endpoint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ingress_endpoint: String,
}

/// v3 (hub): optional alias, no ingress endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsV3 {
    #[serde(default, deserialize_with = "null_as_default")]
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub after: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub before: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sequence: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_standby_state_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: ParametersV3,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersV3 {
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_endpoint: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub healthz_endpoint: String,
}

pub type SiteManagerV1 = SiteManager<OptionsV1>;
pub type SiteManagerV2 = SiteManager<OptionsV2>;
pub type SiteManagerV3 = SiteManager<OptionsV3>;

impl<O> SiteManager<O> {
    pub fn name(&self) -> &str { self.metadata.name.as_deref().unwrap_or("") }
    pub fn namespace(&self) -> &str { self.metadata.namespace.as_deref().unwrap_or("") }
    pub fn uid(&self) -> &str { self.metadata.uid.as_deref().unwrap_or("") }

    /// `<name>.<namespace>`, the name every version gets when no alias is set.
    pub fn calculated_name(&self) -> String { service_name(self.name(), self.namespace(), None) }
}

impl SiteManagerV3 {
    pub fn service_name(&self) -> String {
        service_name(self.name(), self.namespace(), self.spec.sitemanager.alias.as_deref())
    }
}

/// A SiteManager object in whatever schema version it was written in.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResource {
    V1(SiteManagerV1),
    V2(SiteManagerV2),
    V3(SiteManagerV3),
}

impl RawResource {
    pub fn version(&self) -> SchemaVersion {
        match self {
            RawResource::V1(_) => SchemaVersion::V1,
            RawResource::V2(_) => SchemaVersion::V2,
            RawResource::V3(_) => SchemaVersion::V3,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            RawResource::V1(o) => &o.metadata,
            RawResource::V2(o) => &o.metadata,
            RawResource::V3(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str { self.metadata().name.as_deref().unwrap_or("") }
    pub fn namespace(&self) -> &str { self.metadata().namespace.as_deref().unwrap_or("") }
    pub fn uid(&self) -> &str { self.metadata().uid.as_deref().unwrap_or("") }

    /// Decode an object, picking the version from its `apiVersion`.
    pub fn from_value(value: serde_json::Value) -> Result<Self, CoreError> {
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or(CoreError::MissingApiVersion)?;
        let version: SchemaVersion = api_version.parse()?;
        Self::decode(version, value)
    }

    /// Decode an object as the given version, ignoring its `apiVersion`.
    pub fn decode(version: SchemaVersion, value: serde_json::Value) -> Result<Self, CoreError> {
        fn de<T: DeserializeOwned>(version: SchemaVersion, value: serde_json::Value) -> Result<T, CoreError> {
            serde_json::from_value(value).map_err(|e| CoreError::Decode { version, reason: e.to_string() })
        }
        Ok(match version {
            SchemaVersion::V1 => RawResource::V1(de(version, value)?),
            SchemaVersion::V2 => RawResource::V2(de(version, value)?),
            SchemaVersion::V3 => RawResource::V3(de(version, value)?),
        })
    }

    /// Encode with the given `apiVersion`/`kind` header.
    pub fn into_value(self, api_version: &str, kind: &str) -> Result<serde_json::Value, CoreError> {
        let version = self.version();
        let encoded = match self {
            RawResource::V1(o) => serde_json::to_value(o),
            RawResource::V2(o) => serde_json::to_value(o),
            RawResource::V3(o) => serde_json::to_value(o),
        };
        let mut value = encoded.map_err(|e| CoreError::Encode { version, reason: e.to_string() })?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("apiVersion".into(), serde_json::Value::String(api_version.to_string()));
            obj.insert("kind".into(), serde_json::Value::String(kind.to_string()));
        }
        Ok(value)
    }
}
