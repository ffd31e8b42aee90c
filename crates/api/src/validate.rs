//! Service name uniqueness at admission time.

use drnav_core::{RawResource, ServiceRegistry};
use drnav_schema::{to_hub, NoLookup};
use tracing::debug;

use crate::{ApiError, ApiResult};

/// Name an object would register under, and how it got it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameClaim {
    pub name: String,
    pub uid: String,
    /// The object itself spells out an alias (v3 only).
    pub is_alias: bool,
}

impl NameClaim {
    pub fn of(object: &RawResource) -> Self {
        let is_alias = matches!(object, RawResource::V3(o) if o.spec.sitemanager.alias.is_some());
        let uid = object.uid().to_string();
        let name = to_hub(object.clone(), &NoLookup).service_name();
        Self { name, uid, is_alias }
    }
}

pub fn conflict_message(name: &str, is_alias: bool) -> String {
    if is_alias {
        format!("Can't use service alias {}, this name is used for another service", name)
    } else {
        format!("Can't use service with calculated name {}, this name is used for another service", name)
    }
}

/// Ok unless `name` is registered by an object with a different UID.
pub fn check_name(registry: &ServiceRegistry, name: &str, uid: &str, is_alias: bool) -> ApiResult<()> {
    match registry.get(name) {
        Some(existing) if existing.uid != uid => {
            debug!(service = %name, owner = %existing.source_ref(), "service name already in use");
            Err(ApiError::NameConflict { name: name.to_string(), message: conflict_message(name, is_alias) })
        }
        _ => Ok(()),
    }
}
