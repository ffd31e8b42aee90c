//! drnav schema: hub-and-spoke conversion between SiteManager schema versions.
//!
//! `v3` is the hub. `v1` and `v2` only know how to convert to and from the hub;
//! any spoke-to-spoke conversion goes through it.

#![forbid(unsafe_code)]

use drnav_core::{
    CoreError, Families, OptionsV1, OptionsV2, OptionsV3, ParametersV2, ParametersV3, RawResource, SchemaVersion, SiteManager,
    SiteManagerV1, SiteManagerV2, SiteManagerV3, Spec, STATEFUL_MODULE,
};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("API version {0} is not supported")]
    UnsupportedVersion(String),
    #[error("can't convert {namespace}/{name} to {target}: module {module:?} is not supported, only stateful")]
    ModuleNotSupported { name: String, namespace: String, module: String, target: SchemaVersion },
    #[error("malformed object: {0}")]
    Malformed(String),
}

impl From<CoreError> for ConversionError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnsupportedVersion(v) => ConversionError::UnsupportedVersion(v),
            other => ConversionError::Malformed(other.to_string()),
        }
    }
}

/// Best-effort resolution of a dependency written as a bare resource name into a service name.
pub trait NameLookup: Send + Sync {
    fn resolve(&self, resource_name: &str) -> Option<String>;
}

/// Lookup that never resolves anything.
pub struct NoLookup;

impl NameLookup for NoLookup {
    fn resolve(&self, _resource_name: &str) -> Option<String> { None }
}

/// Resource name → calculated service name, built from a v2 listing.
#[derive(Debug, Clone, Default)]
pub struct V2NameIndex {
    by_name: FxHashMap<String, String>,
}

impl V2NameIndex {
    /// When a resource name exists in several namespaces the lexically smallest service name wins.
    pub fn from_resources<'a>(items: impl IntoIterator<Item = &'a SiteManagerV2>) -> Self {
        let mut by_name: FxHashMap<String, String> = FxHashMap::default();
        for o in items {
            let calculated = o.calculated_name();
            match by_name.get_mut(o.name()) {
                Some(cur) if calculated < *cur => *cur = calculated,
                Some(_) => {}
                None => {
                    by_name.insert(o.name().to_string(), calculated);
                }
            }
        }
        Self { by_name }
    }

    pub fn len(&self) -> usize { self.by_name.len() }
    pub fn is_empty(&self) -> bool { self.by_name.is_empty() }
}

impl NameLookup for V2NameIndex {
    fn resolve(&self, resource_name: &str) -> Option<String> { self.by_name.get(resource_name).cloned() }
}

/// A non-hub schema version.
pub trait Spoke: Sized {
    const VERSION: SchemaVersion;

    fn convert_to_hub(self, lookup: &dyn NameLookup) -> SiteManagerV3;

    fn convert_from_hub(hub: SiteManagerV3) -> Result<Self, ConversionError>;
}

impl Spoke for SiteManagerV1 {
    const VERSION: SchemaVersion = SchemaVersion::V1;

    fn convert_to_hub(self, _lookup: &dyn NameLookup) -> SiteManagerV3 {
        let sm = self.spec.sitemanager;
        SiteManager {
            metadata: self.metadata,
            spec: Spec {
                sitemanager: OptionsV3 {
                    module: STATEFUL_MODULE.to_string(),
                    alias: None,
                    after: sm.after,
                    before: sm.before,
                    sequence: sm.sequence,
                    allowed_standby_state_list: sm.allowed_standby_state_list,
                    timeout: sm.timeout,
                    parameters: ParametersV3 {
                        service_endpoint: sm.service_endpoint,
                        healthz_endpoint: sm.healthz_endpoint,
                    },
                },
            },
            status: self.status,
        }
    }

    fn convert_from_hub(hub: SiteManagerV3) -> Result<Self, ConversionError> {
        let sm = hub.spec.sitemanager;
        if sm.module != STATEFUL_MODULE {
            return Err(ConversionError::ModuleNotSupported {
                name: hub.metadata.name.clone().unwrap_or_default(),
                namespace: hub.metadata.namespace.clone().unwrap_or_default(),
                module: sm.module,
                target: Self::VERSION,
            });
        }
        Ok(SiteManager {
            metadata: hub.metadata,
            spec: Spec {
                sitemanager: OptionsV1 {
                    after: sm.after,
                    before: sm.before,
                    sequence: sm.sequence,
                    allowed_standby_state_list: sm.allowed_standby_state_list,
                    timeout: sm.timeout,
                    service_endpoint: sm.parameters.service_endpoint,
                    healthz_endpoint: sm.parameters.healthz_endpoint,
                    ingress_endpoint: String::new(),
                },
            },
            status: hub.status,
        })
    }
}

impl Spoke for SiteManagerV2 {
    const VERSION: SchemaVersion = SchemaVersion::V2;

    fn convert_to_hub(self, lookup: &dyn NameLookup) -> SiteManagerV3 {
        let calculated = self.calculated_name();
        let owner = format!("{}/{}", self.namespace(), self.name());
        let sm = self.spec.sitemanager;
        let module = if sm.module.is_empty() { STATEFUL_MODULE.to_string() } else { sm.module };
        let alias = (module != STATEFUL_MODULE).then_some(calculated);
        let after = resolve_deps(sm.after, lookup, &owner, "after");
        let before = resolve_deps(sm.before, lookup, &owner, "before");
        SiteManager {
            metadata: self.metadata,
            spec: Spec {
                sitemanager: OptionsV3 {
                    module,
                    alias,
                    after,
                    before,
                    sequence: sm.sequence,
                    allowed_standby_state_list: sm.allowed_standby_state_list,
                    timeout: sm.timeout,
                    parameters: ParametersV3 {
                        service_endpoint: sm.parameters.service_endpoint,
                        healthz_endpoint: sm.parameters.healthz_endpoint,
                    },
                },
            },
            status: self.status,
        }
    }

    fn convert_from_hub(hub: SiteManagerV3) -> Result<Self, ConversionError> {
        let sm = hub.spec.sitemanager;
        Ok(SiteManager {
            metadata: hub.metadata,
            spec: Spec {
                sitemanager: OptionsV2 {
                    module: sm.module,
                    after: sm.after,
                    before: sm.before,
                    sequence: sm.sequence,
                    allowed_standby_state_list: sm.allowed_standby_state_list,
                    timeout: sm.timeout,
                    parameters: ParametersV2 {
                        service_endpoint: sm.parameters.service_endpoint,
                        healthz_endpoint: sm.parameters.healthz_endpoint,
                        ingress_endpoint: String::new(),
                    },
                },
            },
            status: hub.status,
        })
    }
}

fn resolve_deps(deps: Vec<String>, lookup: &dyn NameLookup, owner: &str, field: &str) -> Vec<String> {
    deps.into_iter()
        .map(|dep| match lookup.resolve(&dep) {
            Some(resolved) => {
                debug!(owner = %owner, field, dep = %dep, resolved = %resolved, "dependency resolved");
                resolved
            }
            None => {
                warn!(owner = %owner, field, dep = %dep, "dependency not found among v2 objects; kept as is");
                dep
            }
        })
        .collect()
}

/// Lift any version to the hub.
pub fn to_hub(resource: RawResource, lookup: &dyn NameLookup) -> SiteManagerV3 {
    match resource {
        RawResource::V1(o) => o.convert_to_hub(lookup),
        RawResource::V2(o) => o.convert_to_hub(lookup),
        RawResource::V3(o) => o,
    }
}

/// Lower a hub object to `desired`.
pub fn from_hub(hub: SiteManagerV3, desired: SchemaVersion) -> Result<RawResource, ConversionError> {
    Ok(match desired {
        SchemaVersion::V1 => RawResource::V1(SiteManagerV1::convert_from_hub(hub)?),
        SchemaVersion::V2 => RawResource::V2(SiteManagerV2::convert_from_hub(hub)?),
        SchemaVersion::V3 => RawResource::V3(hub),
    })
}

/// Convert `resource` to `desired`, going through the hub. Same-version conversion is the identity.
pub fn convert(
    resource: RawResource,
    desired: SchemaVersion,
    lookup: &dyn NameLookup,
) -> Result<RawResource, ConversionError> {
    if resource.version() == desired {
        return Ok(resource);
    }
    from_hub(to_hub(resource, lookup), desired)
}

/// JSON-level conversion used by the conversion webhook. Both the object's apiVersion and
/// `desired_api_version` must belong to one of `families`; the output carries `desired_api_version`
/// verbatim and keeps the input `kind`.
pub fn convert_object(
    object: serde_json::Value,
    desired_api_version: &str,
    families: &Families,
    lookup: &dyn NameLookup,
) -> Result<serde_json::Value, ConversionError> {
    let (_, desired) = families
        .classify(desired_api_version)
        .map_err(|_| ConversionError::UnsupportedVersion(desired_api_version.to_string()))?;
    let source = object.get("apiVersion").and_then(|v| v.as_str()).ok_or(CoreError::MissingApiVersion)?;
    families.classify(source).map_err(|_| ConversionError::UnsupportedVersion(source.to_string()))?;
    let kind = object.get("kind").and_then(|k| k.as_str()).unwrap_or("").to_string();
    let resource = RawResource::from_value(object)?;
    let converted = convert(resource, desired, lookup)?;
    Ok(converted.into_value(desired_api_version, &kind)?)
}
