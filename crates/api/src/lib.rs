//! drnav controller façade (in-process).
//!
//! This crate defines the traits and types the HTTP front and the admission/conversion hooks
//! depend on. `Controller` builds a fresh registry for every call; `MockApi` serves canned data.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use drnav_core::{CanonicalService, Families, RawResource, ServiceRegistry};
use drnav_kubehub::ObjectStore;
use drnav_ops::{Dispatched, Outbound, ProbeError, ServiceStatus, TransportError};
use drnav_schema::{ConversionError, NameLookup, NoLookup};
use drnav_store::{RegistryError, RegistrySource};
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod status;
pub mod validate;

pub use drnav_ops::Mode;
pub use status::collect_status;
pub use validate::{check_name, NameClaim};

/// Errors surfaced by the request API and the admission hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Service doesn't exist")]
    ServiceNotFound { service: String },
    #[error("Dependency defined in CR doesn't exist")]
    DependencyNotFound { missing: String, referrer: String },
    #[error("{message}")]
    NameConflict { name: String, message: String },
    #[error("{0}")]
    ProbeFailed(#[from] ProbeError),
    #[error("{message}")]
    Internal { message: String, service: Option<String> },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self { ApiError::Internal { message: e.to_string(), service: None } }
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "wrong-service", default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(rename = "problem-cr", default, skip_serializing_if = "Option::is_none")]
    pub problem_cr: Option<String>,
}

impl ErrorBody {
    pub fn plain(message: impl Into<String>) -> Self { Self { message: message.into(), service: None, problem_cr: None } }
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_)
            | ApiError::ServiceNotFound { .. }
            | ApiError::DependencyNotFound { .. }
            | ApiError::NameConflict { .. } => 400,
            ApiError::ProbeFailed(_) | ApiError::Internal { .. } => 500,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let message = self.to_string();
        match self {
            ApiError::ServiceNotFound { service } => ErrorBody { message, service: Some(service.clone()), problem_cr: None },
            ApiError::DependencyNotFound { missing, referrer } => {
                ErrorBody { message, service: Some(missing.clone()), problem_cr: Some(referrer.clone()) }
            }
            ApiError::NameConflict { name, .. } => ErrorBody { message, service: Some(name.clone()), problem_cr: None },
            ApiError::ProbeFailed(e) => ErrorBody { message, service: Some(e.service().to_string()), problem_cr: None },
            ApiError::Internal { service, .. } => ErrorBody { message, service: service.clone(), problem_cr: None },
            ApiError::BadRequest(_) => ErrorBody::plain(message),
        }
    }
}

/// Body of `POST /sitemanager`. Older field spellings are accepted too.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteManagerRequest {
    pub procedure: String,
    #[serde(default, alias = "run-service", skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, alias = "with_deps")]
    pub with_deps: bool,
    #[serde(default, alias = "no-wait")]
    pub no_wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    List,
    Status,
    Change(Mode),
}

impl Procedure {
    pub const NAMES: [&'static str; 5] = ["list", "status", "active", "standby", "disable"];
}

impl FromStr for Procedure {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(Procedure::List),
            "status" => Ok(Procedure::Status),
            other => Mode::parse(other).map(Procedure::Change).ok_or_else(|| {
                ApiError::BadRequest(format!("You should define procedure from list: [{}]", Procedure::NAMES.join(" ")))
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub all_services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deps {
    pub after: Vec<String>,
    pub before: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub mode: String,
    pub status: String,
    pub health: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<Deps>,
}

impl From<ServiceStatus> for StatusEntry {
    fn from(s: ServiceStatus) -> Self {
        Self { mode: s.mode, status: s.status, health: s.health, message: s.message, deps: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub services: BTreeMap<String, StatusEntry>,
}

/// Outcome of a mode change. `failed` is reported through the HTTP status, not the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureResponse {
    pub message: String,
    pub service: String,
    pub procedure: String,
    #[serde(skip)]
    pub failed: bool,
}

impl ProcedureResponse {
    pub fn status_code(&self) -> u16 { if self.failed { 400 } else { 200 } }
}

/// Any answer of `POST /sitemanager`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SiteManagerReply {
    List(ListResponse),
    Status(StatusResponse),
    Procedure(ProcedureResponse),
}

impl SiteManagerReply {
    pub fn status_code(&self) -> u16 {
        match self {
            SiteManagerReply::Procedure(p) => p.status_code(),
            _ => 200,
        }
    }
}

/// Calls a service makes against the remote instances it orchestrates.
#[async_trait::async_trait]
pub trait RemoteOps: Send + Sync {
    async fn probe(&self, svc: &CanonicalService) -> Result<ServiceStatus, ProbeError>;
    async fn dispatch(&self, svc: &CanonicalService, mode: Mode, no_wait: bool) -> Result<Dispatched, TransportError>;
}

#[async_trait::async_trait]
impl RemoteOps for Outbound {
    async fn probe(&self, svc: &CanonicalService) -> Result<ServiceStatus, ProbeError> { Outbound::probe(self, svc).await }
    async fn dispatch(&self, svc: &CanonicalService, mode: Mode, no_wait: bool) -> Result<Dispatched, TransportError> {
        Outbound::dispatch(self, svc, mode, no_wait).await
    }
}

/// Controller API surface.
#[async_trait::async_trait]
pub trait DrnavApi: Send + Sync {
    /// Whole registry (`GET /sitemanager`).
    async fn services(&self) -> ApiResult<ServiceRegistry>;

    /// Registered service names, sorted.
    async fn list(&self) -> ApiResult<ListResponse>;

    /// Live status of `service`, and of everything it reaches through after/before when `with_deps`.
    async fn status(&self, service: &str, with_deps: bool) -> ApiResult<StatusResponse>;

    /// Ask `service` to switch to `mode`.
    async fn process(&self, service: &str, mode: Mode, no_wait: bool) -> ApiResult<ProcedureResponse>;

    /// Reject `name` when another object (different UID) already owns it.
    async fn validate_name(&self, name: &str, uid: &str, is_alias: bool) -> ApiResult<()>;

    /// Convert a stored object to `desired_api_version` for the conversion hook.
    async fn convert(&self, object: serde_json::Value, desired_api_version: &str) -> Result<serde_json::Value, ConversionError>;

    /// Admission check for a created/updated object.
    async fn validate_object(&self, object: &RawResource) -> ApiResult<()> {
        let claim = NameClaim::of(object);
        self.validate_name(&claim.name, &claim.uid, claim.is_alias).await
    }

    /// Route one request-API body to the matching operation.
    async fn handle(&self, req: SiteManagerRequest) -> ApiResult<SiteManagerReply> {
        let procedure: Procedure = req.procedure.parse()?;
        let service = || {
            req.service
                .clone()
                .ok_or_else(|| ApiError::BadRequest("run-service value should be defined and have String type".into()))
        };
        Ok(match procedure {
            Procedure::List => SiteManagerReply::List(self.list().await?),
            Procedure::Status => SiteManagerReply::Status(self.status(&service()?, req.with_deps).await?),
            Procedure::Change(mode) => SiteManagerReply::Procedure(self.process(&service()?, mode, req.no_wait).await?),
        })
    }
}

// ----------------- In-process implementation -----------------

/// In-process implementation over a registry source and the remote ops seam.
pub struct Controller {
    source: Arc<dyn RegistrySource>,
    remote: Arc<dyn RemoteOps>,
    /// Store used to resolve v2 dependency names during conversion; none in testing mode.
    lookup_store: Option<Arc<dyn ObjectStore>>,
    /// API groups accepted on the conversion path.
    families: Families,
}

impl Controller {
    pub fn new(source: Arc<dyn RegistrySource>, remote: Arc<dyn RemoteOps>) -> Self {
        Self { source, remote, lookup_store: None, families: Families::default() }
    }

    pub fn with_families(mut self, families: Families) -> Self {
        self.families = families;
        self
    }

    pub fn with_lookup_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.lookup_store = Some(store);
        self
    }

    async fn registry(&self) -> ApiResult<ServiceRegistry> { Ok(self.source.registry().await?) }
}

#[async_trait::async_trait]
impl DrnavApi for Controller {
    async fn services(&self) -> ApiResult<ServiceRegistry> {
        let t0 = Instant::now();
        let reg = self.registry().await?;
        info!(count = reg.len(), took_ms = %t0.elapsed().as_millis(), "api: services ok");
        Ok(reg)
    }

    async fn list(&self) -> ApiResult<ListResponse> {
        let t0 = Instant::now();
        let all_services = self.registry().await?.names();
        info!(count = all_services.len(), took_ms = %t0.elapsed().as_millis(), "api: list ok");
        Ok(ListResponse { all_services })
    }

    async fn status(&self, service: &str, with_deps: bool) -> ApiResult<StatusResponse> {
        let t0 = Instant::now();
        info!(service = %service, with_deps, "api: status start");
        let reg = self.registry().await?;
        let services = collect_status(&reg, self.remote.as_ref(), service, with_deps).await?;
        info!(service = %service, count = services.len(), took_ms = %t0.elapsed().as_millis(), "api: status ok");
        Ok(StatusResponse { services })
    }

    async fn process(&self, service: &str, mode: Mode, no_wait: bool) -> ApiResult<ProcedureResponse> {
        let t0 = Instant::now();
        let reg = self.registry().await?;
        let svc = reg.get(service).ok_or_else(|| ApiError::ServiceNotFound { service: service.to_string() })?;
        let outcome = self.remote.dispatch(svc, mode, no_wait).await.map_err(|e| ApiError::Internal {
            message: format!("Processing service error: {}", e),
            service: Some(service.to_string()),
        })?;
        info!(service = %service, mode = %mode, failed = outcome.failed, took_ms = %t0.elapsed().as_millis(), "api: process done");
        Ok(ProcedureResponse {
            message: outcome.message,
            service: service.to_string(),
            procedure: mode.to_string(),
            failed: outcome.failed,
        })
    }

    async fn validate_name(&self, name: &str, uid: &str, is_alias: bool) -> ApiResult<()> {
        let reg = self.registry().await?;
        check_name(&reg, name, uid, is_alias)
    }

    async fn convert(&self, object: serde_json::Value, desired_api_version: &str) -> Result<serde_json::Value, ConversionError> {
        let from_v2 = object.get("apiVersion").and_then(|v| v.as_str()).is_some_and(|v| v.ends_with("/v2"));
        let lookup: Box<dyn NameLookup> = match (&self.lookup_store, from_v2) {
            (Some(store), true) => Box::new(drnav_store::v2_name_index(store.as_ref()).await),
            _ => Box::new(NoLookup),
        };
        drnav_schema::convert_object(object, desired_api_version, &self.families, lookup.as_ref())
    }
}

// ----------------- Mock implementation -----------------

/// In-memory mock for frontend tests.
#[derive(Default)]
pub struct MockApi {
    pub registry: ServiceRegistry,
    pub status: StatusResponse,
    pub failed_procedures: bool,
    pub conflict: Option<ApiError>,
    pub error: Option<ApiError>,
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    fn fail(&self) -> ApiResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl DrnavApi for MockApi {
    async fn services(&self) -> ApiResult<ServiceRegistry> {
        self.fail()?;
        Ok(self.registry.clone())
    }

    async fn list(&self) -> ApiResult<ListResponse> {
        self.fail()?;
        Ok(ListResponse { all_services: self.registry.names() })
    }

    async fn status(&self, _service: &str, _with_deps: bool) -> ApiResult<StatusResponse> {
        self.fail()?;
        Ok(self.status.clone())
    }

    async fn process(&self, service: &str, mode: Mode, _no_wait: bool) -> ApiResult<ProcedureResponse> {
        self.fail()?;
        let failed = self.failed_procedures;
        let message = if failed { format!("Procedure {} failed", mode) } else { format!("Procedure {} is started", mode) };
        Ok(ProcedureResponse { message, service: service.to_string(), procedure: mode.to_string(), failed })
    }

    async fn validate_name(&self, _name: &str, _uid: &str, _is_alias: bool) -> ApiResult<()> {
        match &self.conflict {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn convert(&self, object: serde_json::Value, desired_api_version: &str) -> Result<serde_json::Value, ConversionError> {
        drnav_schema::convert_object(object, desired_api_version, &Families::default(), &NoLookup)
    }
}
