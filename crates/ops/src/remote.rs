//! Remote service contract: status probe and mode-change dispatch.

use std::fmt;
use std::time::Instant;

use drnav_core::CanonicalService;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{Outbound, TransportError};

fn dash() -> String { "--".to_string() }

/// Body of a service's status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    #[serde(default = "dash")]
    pub mode: String,
    #[serde(default = "dash")]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

/// Body of a service's health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHealth {
    #[serde(default = "dash")]
    pub status: String,
}

/// Mode a service can be switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Active,
    Standby,
    Disable,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Active, Mode::Standby, Mode::Disable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Active => "active",
            Mode::Standby => "standby",
            Mode::Disable => "disable",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> { Mode::ALL.into_iter().find(|m| m.as_str() == s) }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// POST body sent to a service's endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeChange {
    pub mode: Mode,
    pub no_wait: bool,
}

/// Merged outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub mode: String,
    pub status: String,
    pub health: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("Service request failed, error: {source}")]
    Unreachable { service: String, source: TransportError },
    #[error("Service request failed, error: wrong JSON data received from {url}: {reason}")]
    Decode { service: String, url: String, reason: String },
}

impl ProbeError {
    pub fn service(&self) -> &str {
        match self {
            ProbeError::Unreachable { service, .. } | ProbeError::Decode { service, .. } => service,
        }
    }
}

/// Result of a dispatch that reached the service. `failed` means a non-200 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub message: String,
    pub failed: bool,
    pub status: u16,
}

impl Outbound {
    async fn fetch<T: serde::de::DeserializeOwned>(&self, service: &str, url: &str) -> Result<T, ProbeError> {
        let reply = self
            .get_with_retry(url)
            .await
            .map_err(|source| ProbeError::Unreachable { service: service.to_string(), source })?;
        serde_json::from_slice(&reply.body).map_err(|e| ProbeError::Decode {
            service: service.to_string(),
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Status and health calls run concurrently; both must succeed.
    pub async fn probe(&self, svc: &CanonicalService) -> Result<ServiceStatus, ProbeError> {
        let t0 = Instant::now();
        let (status, health) = tokio::join!(
            self.fetch::<RemoteStatus>(&svc.name, &svc.parameters.service_endpoint),
            self.fetch::<RemoteHealth>(&svc.name, &svc.parameters.healthz_endpoint),
        );
        let outcome = status.and_then(|s| health.map(|h| (s, h)));
        match outcome {
            Ok((s, h)) => {
                counter!("probe_total", 1u64, "outcome" => "ok");
                info!(service = %svc.name, mode = %s.mode, health = %h.status, took_ms = %t0.elapsed().as_millis(), "probe ok");
                Ok(ServiceStatus { mode: s.mode, status: s.status, health: h.status, message: s.message })
            }
            Err(e) => {
                counter!("probe_total", 1u64, "outcome" => "failed");
                error!(service = %svc.name, error = %e, "probe failed");
                Err(e)
            }
        }
    }

    /// One mode-change POST. Exhausted transport retries are an error; any reply is an outcome.
    pub async fn dispatch(&self, svc: &CanonicalService, mode: Mode, no_wait: bool) -> Result<Dispatched, TransportError> {
        let body = serde_json::json!(ModeChange { mode, no_wait });
        info!(service = %svc.name, mode = %mode, endpoint = %svc.parameters.service_endpoint, no_wait, "dispatching procedure");
        let reply = match self.post_with_retry(&svc.parameters.service_endpoint, &body).await {
            Ok(r) => r,
            Err(e) => {
                counter!("dispatch_total", 1u64, "outcome" => "error");
                return Err(e);
            }
        };
        let failed = reply.status != 200;
        counter!("dispatch_total", 1u64, "outcome" => if failed { "failed" } else { "started" });
        let message = if failed { format!("Procedure {} failed", mode) } else { format!("Procedure {} is started", mode) };
        Ok(Dispatched { message, failed, status: reply.status })
    }
}
