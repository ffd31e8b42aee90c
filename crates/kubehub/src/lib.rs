//! drnav kubehub: SiteManager listing per family/version, bearer token cell and inbound token review.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use drnav_core::{Families, Family, RawResource, SchemaVersion};
use kube::{
    api::{Api, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use rustc_hash::FxHashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

mod token;

pub use token::{refresh_from_file, spawn_file_refresh, TokenCell, TokenSource};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("kube {op} failed: {reason}")]
    Kube { op: String, reason: String },
    #[error("decoding {api_version} object {name}: {reason}")]
    Decode { api_version: String, name: String, reason: String },
}

/// Read side of the object store, as far as the registry needs it.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// All SiteManager objects of `family`, served as `version`.
    async fn list(&self, family: Family, version: SchemaVersion) -> Result<Vec<RawResource>, StoreError>;
}

/// `ObjectStore` backed by the Kubernetes API through `DynamicObject`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    families: Families,
}

impl KubeStore {
    pub fn new(client: Client, families: Families) -> Self { Self { client, families } }

    pub async fn try_default(families: Families) -> anyhow::Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self::new(client, families))
    }

    pub fn client(&self) -> Client { self.client.clone() }

    fn api(&self, family: Family, version: SchemaVersion) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(self.families.group(family), version.as_str(), &self.families.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &self.families.plural);
        Api::all_with(self.client.clone(), &ar)
    }
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn list(&self, family: Family, version: SchemaVersion) -> Result<Vec<RawResource>, StoreError> {
        let t0 = Instant::now();
        let api_version = self.families.api_version(family, version);
        let list = self
            .api(family, version)
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::Kube { op: format!("list {}", api_version), reason: e.to_string() })?;
        let mut out = Vec::with_capacity(list.items.len());
        for obj in list.items {
            let name = obj.metadata.name.clone().unwrap_or_default();
            let mut raw = serde_json::to_value(&obj).map_err(|e| StoreError::Decode {
                api_version: api_version.clone(),
                name: name.clone(),
                reason: e.to_string(),
            })?;
            strip_managed_fields(&mut raw);
            let decoded = RawResource::decode(version, raw).map_err(|e| StoreError::Decode {
                api_version: api_version.clone(),
                name,
                reason: e.to_string(),
            })?;
            out.push(decoded);
        }
        debug!(api_version = %api_version, count = out.len(), took_ms = %t0.elapsed().as_millis(), "store: list ok");
        Ok(out)
    }
}

/// In-memory `ObjectStore` keyed by (family, version). Used for testing mode fixtures and tests.
#[derive(Default, Clone)]
pub struct MemoryStore {
    items: FxHashMap<(Family, SchemaVersion), Vec<RawResource>>,
    fail: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, family: Family, version: SchemaVersion, items: Vec<RawResource>) -> Self {
        self.items.entry((family, version)).or_default().extend(items);
        self
    }

    /// Every `list` call fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self { Self { items: FxHashMap::default(), fail: Some(reason.into()) } }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, family: Family, version: SchemaVersion) -> Result<Vec<RawResource>, StoreError> {
        if let Some(reason) = &self.fail {
            return Err(StoreError::Kube { op: format!("list {:?}/{}", family, version), reason: reason.clone() });
        }
        Ok(self.items.get(&(family, version)).cloned().unwrap_or_default())
    }
}

/// Decides whether an inbound bearer token may use the request API.
#[async_trait::async_trait]
pub trait BearerValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<bool, StoreError>;
}

/// Service account every caller must authenticate as.
pub fn expected_caller(pod_namespace: &str) -> String { format!("system:serviceaccount:{}:sm-auth-sa", pod_namespace) }

/// Validates bearers with a `TokenReview` and checks the authenticated user name.
pub struct TokenReviewValidator {
    client: Client,
    expected_user: String,
}

impl TokenReviewValidator {
    pub fn new(client: Client, pod_namespace: &str) -> Self {
        Self { client, expected_user: expected_caller(pod_namespace) }
    }
}

#[async_trait::async_trait]
impl BearerValidator for TokenReviewValidator {
    async fn validate(&self, token: &str) -> Result<bool, StoreError> {
        use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
        let api: Api<TokenReview> = Api::all(self.client.clone());
        let review = TokenReview {
            spec: TokenReviewSpec { token: Some(token.to_string()), ..Default::default() },
            ..Default::default()
        };
        let created = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| StoreError::Kube { op: "create tokenreview".into(), reason: e.to_string() })?;
        let Some(status) = created.status else { return Ok(false) };
        if status.authenticated != Some(true) {
            return Ok(false);
        }
        let user = status.user.and_then(|u| u.username).unwrap_or_default();
        if user != self.expected_user {
            warn!(user = %user, expected = %self.expected_user, "bearer belongs to an unexpected user");
            return Ok(false);
        }
        info!(user = %user, "bearer accepted");
        Ok(true)
    }
}

/// Accepts exactly one fixed token (testing mode).
pub struct StaticBearer(pub Arc<String>);

#[async_trait::async_trait]
impl BearerValidator for StaticBearer {
    async fn validate(&self, token: &str) -> Result<bool, StoreError> { Ok(!token.is_empty() && token == self.0.as_str()) }
}
