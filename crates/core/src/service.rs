//! Canonical service model and the name-keyed registry built from it.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{SiteManagerV3, STATEFUL_MODULE};

/// Service name: the alias when present, otherwise `<name>.<namespace>`.
pub fn service_name(name: &str, namespace: &str, alias: Option<&str>) -> String {
    match alias {
        Some(a) => a.to_string(),
        None => format!("{}.{}", name, namespace),
    }
}

/// Prefix `scheme` onto a non-empty endpoint that has none.
pub fn apply_http_scheme(endpoint: &str, scheme: &str) -> String {
    if endpoint.is_empty() || endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    format!("{}{}", scheme, endpoint)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    #[serde(default)]
    pub service_endpoint: String,
    #[serde(default)]
    pub healthz_endpoint: String,
}

/// One registered service, normalized from whichever family/version it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalService {
    /// Name of the backing resource.
    #[serde(default)]
    pub resource_name: String,
    /// Computed service name (registry key).
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing)]
    pub uid: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub sequence: Vec<String>,
    #[serde(default)]
    pub allowed_standby_state_list: Vec<String>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl CanonicalService {
    /// Build from a hub-shaped object and apply defaults.
    pub fn from_hub(obj: &SiteManagerV3, http_scheme: &str) -> Self {
        let sm = &obj.spec.sitemanager;
        let mut svc = Self {
            resource_name: obj.name().to_string(),
            name: obj.service_name(),
            namespace: obj.namespace().to_string(),
            uid: obj.uid().to_string(),
            module: sm.module.clone(),
            after: sm.after.clone(),
            before: sm.before.clone(),
            sequence: sm.sequence.clone(),
            allowed_standby_state_list: sm.allowed_standby_state_list.clone(),
            parameters: Parameters {
                service_endpoint: sm.parameters.service_endpoint.clone(),
                healthz_endpoint: sm.parameters.healthz_endpoint.clone(),
            },
            timeout: sm.timeout,
            alias: sm.alias.clone(),
        };
        svc.apply_defaults(http_scheme);
        svc
    }

    pub fn apply_defaults(&mut self, http_scheme: &str) {
        if self.module.is_empty() {
            self.module = STATEFUL_MODULE.to_string();
        }
        if self.sequence.is_empty() {
            self.sequence = vec!["standby".into(), "active".into()];
        }
        if self.allowed_standby_state_list.is_empty() {
            self.allowed_standby_state_list = vec!["up".into()];
        }
        self.parameters.service_endpoint = apply_http_scheme(&self.parameters.service_endpoint, http_scheme);
        self.parameters.healthz_endpoint = apply_http_scheme(&self.parameters.healthz_endpoint, http_scheme);
    }

    /// `<namespace>/<resource>` reference used in logs.
    pub fn source_ref(&self) -> String { format!("{}/{}", self.namespace, self.resource_name) }
}

/// Name-keyed directory of canonical services. Built per request, immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistry {
    #[serde(default)]
    pub services: FxHashMap<String, CanonicalService>,
}

impl ServiceRegistry {
    pub fn get(&self, name: &str) -> Option<&CanonicalService> { self.services.get(name) }
    pub fn contains(&self, name: &str) -> bool { self.services.contains_key(name) }
    pub fn len(&self) -> usize { self.services.len() }
    pub fn is_empty(&self) -> bool { self.services.is_empty() }

    /// Service names in lexical order.
    pub fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = self.services.keys().cloned().collect();
        out.sort_unstable();
        out
    }
}

impl FromIterator<(String, CanonicalService)> for ServiceRegistry {
    fn from_iter<I: IntoIterator<Item = (String, CanonicalService)>>(iter: I) -> Self {
        Self { services: iter.into_iter().collect() }
    }
}
