//! drnav store: builds the per-request service registry from both object families.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use drnav_core::{CanonicalService, Families, Family, RawResource, SchemaVersion, ServiceRegistry, SiteManagerV3};
use drnav_kubehub::{ObjectStore, StoreError};
use drnav_schema::{to_hub, NoLookup, V2NameIndex};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("fetching {family:?} family: {source}")]
    Fetch { family: Family, source: StoreError },
}

/// Where a registry comes from. Each call yields a fresh, unshared registry.
#[async_trait::async_trait]
pub trait RegistrySource: Send + Sync {
    async fn registry(&self) -> Result<ServiceRegistry, RegistryError>;
}

/// Two-phase merge: legacy entries first, current entries overwrite them.
pub struct RegistryBuilder {
    http_scheme: String,
    services: FxHashMap<String, CanonicalService>,
    origin: FxHashMap<String, Family>,
    shadowed: u64,
}

impl RegistryBuilder {
    pub fn new(http_scheme: impl Into<String>) -> Self {
        Self { http_scheme: http_scheme.into(), services: FxHashMap::default(), origin: FxHashMap::default(), shadowed: 0 }
    }

    pub fn stage_legacy(&mut self, items: impl IntoIterator<Item = RawResource>) -> &mut Self {
        for item in items {
            self.insert(Family::Legacy, hub_of(item));
        }
        self
    }

    pub fn stage_current(&mut self, items: impl IntoIterator<Item = RawResource>) -> &mut Self {
        for item in items {
            self.insert(Family::Current, hub_of(item));
        }
        self
    }

    /// Entries replaced by a current-family object so far.
    pub fn shadowed(&self) -> u64 { self.shadowed }

    pub fn finish(self) -> ServiceRegistry { ServiceRegistry { services: self.services } }

    fn insert(&mut self, family: Family, obj: SiteManagerV3) {
        let svc = CanonicalService::from_hub(&obj, &self.http_scheme);
        let name = svc.name.clone();
        if let Some(prev) = self.services.get(&name) {
            match (self.origin.get(&name).copied(), family) {
                (Some(Family::Legacy), Family::Current) => {
                    warn!(
                        service = %name,
                        legacy = %prev.source_ref(),
                        current = %svc.source_ref(),
                        "Legacy resource is shadowed by new resource"
                    );
                    self.shadowed += 1;
                    counter!("registry_shadowed_total", 1u64);
                }
                _ => warn!(
                    service = %name,
                    previous = %prev.source_ref(),
                    next = %svc.source_ref(),
                    "duplicate service name within one family; last one wins"
                ),
            }
        }
        self.origin.insert(name.clone(), family);
        self.services.insert(name, svc);
    }
}

fn hub_of(item: RawResource) -> SiteManagerV3 { to_hub(item, &NoLookup) }

/// Live registry: both families listed concurrently, legacy one served as the hub version.
pub struct LiveSource {
    store: Arc<dyn ObjectStore>,
    http_scheme: String,
}

impl LiveSource {
    pub fn new(store: Arc<dyn ObjectStore>, http_scheme: impl Into<String>) -> Self {
        Self { store, http_scheme: http_scheme.into() }
    }
}

#[async_trait::async_trait]
impl RegistrySource for LiveSource {
    async fn registry(&self) -> Result<ServiceRegistry, RegistryError> {
        let t0 = Instant::now();
        let (legacy, current) = tokio::try_join!(
            async {
                self.store
                    .list(Family::Legacy, SchemaVersion::HUB)
                    .await
                    .map_err(|source| RegistryError::Fetch { family: Family::Legacy, source })
            },
            async {
                self.store
                    .list(Family::Current, SchemaVersion::HUB)
                    .await
                    .map_err(|source| RegistryError::Fetch { family: Family::Current, source })
            },
        )?;
        let (n_legacy, n_current) = (legacy.len(), current.len());
        let mut builder = RegistryBuilder::new(self.http_scheme.clone());
        builder.stage_legacy(legacy).stage_current(current);
        let shadowed = builder.shadowed();
        let registry = builder.finish();
        let took = t0.elapsed();
        histogram!("registry_build_ms", took.as_secs_f64() * 1000.0);
        debug!(
            legacy = n_legacy,
            current = n_current,
            shadowed,
            services = registry.len(),
            took_ms = %took.as_millis(),
            "registry built"
        );
        Ok(registry)
    }
}

/// Fixed registry supplied up front (testing mode).
pub struct StaticSource {
    registry: ServiceRegistry,
}

impl StaticSource {
    /// Entries are keyed by their map key; missing names and defaults are filled in.
    pub fn new(registry: ServiceRegistry, http_scheme: &str) -> Self {
        let services = registry
            .services
            .into_iter()
            .map(|(key, mut svc)| {
                if svc.name.is_empty() {
                    svc.name = key.clone();
                }
                svc.apply_defaults(http_scheme);
                (key, svc)
            })
            .collect();
        info!("static registry source in use");
        Self { registry: ServiceRegistry { services } }
    }
}

#[async_trait::async_trait]
impl RegistrySource for StaticSource {
    async fn registry(&self) -> Result<ServiceRegistry, RegistryError> { Ok(self.registry.clone()) }
}

/// Resource-name index over legacy v2 objects, for resolving v2 dependency names during conversion.
/// A failed fetch logs and yields an empty index.
pub async fn v2_name_index(store: &dyn ObjectStore) -> V2NameIndex {
    match store.list(Family::Legacy, SchemaVersion::V2).await {
        Ok(items) => {
            let v2: Vec<_> = items
                .into_iter()
                .filter_map(|r| match r {
                    RawResource::V2(o) => Some(o),
                    _ => None,
                })
                .collect();
            V2NameIndex::from_resources(v2.iter())
        }
        Err(e) => {
            warn!(error = %e, "listing v2 objects for name lookup failed; dependencies stay unresolved");
            V2NameIndex::default()
        }
    }
}

/// Convenience used by the binary: which api versions a live source reads.
pub fn live_api_versions(families: &Families) -> [String; 2] {
    [families.api_version(Family::Legacy, SchemaVersion::HUB), families.api_version(Family::Current, SchemaVersion::HUB)]
}
