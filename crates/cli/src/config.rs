use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use drnav_core::{CanonicalService, Families, ServiceRegistry};
use drnav_ops::HttpConfig;
use serde::Deserialize;

#[derive(Parser, Debug, Clone)]
#[command(name = "drnavd", version, about = "drnav site-manager controller")]
pub struct Args {
    /// Request API listener (`/sitemanager`, `/health`)
    #[arg(long, env = "DRNAV_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Admission and conversion hook listener
    #[arg(long, env = "DRNAV_WEBHOOK_BIND", default_value = "0.0.0.0:8443")]
    pub webhook_bind: SocketAddr,

    #[arg(long, env = "DRNAV_LEGACY_GROUP", default_value = "netcracker.com")]
    pub legacy_group: String,

    #[arg(long, env = "DRNAV_CURRENT_GROUP", default_value = "qubership.org")]
    pub current_group: String,

    #[arg(long, env = "DRNAV_KIND", default_value = "SiteManager")]
    pub kind: String,

    #[arg(long, env = "DRNAV_PLURAL", default_value = "sitemanagers")]
    pub plural: String,

    /// Prefix given to schemeless service endpoints
    #[arg(long, env = "DRNAV_HTTP_SCHEME", default_value = "http://")]
    pub http_scheme: String,

    /// Attach the service-account bearer to outbound calls
    #[arg(long, env = "DRNAV_BACK_HTTP_AUTH")]
    pub back_http_auth: bool,

    /// Require a bearer on `/sitemanager`
    #[arg(long, env = "DRNAV_FRONT_HTTP_AUTH")]
    pub front_http_auth: bool,

    #[arg(long, env = "DRNAV_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    #[arg(long, env = "DRNAV_TOKEN_REFRESH_SECS", default_value_t = 30)]
    pub token_refresh_secs: u64,

    #[arg(long, env = "DRNAV_GET_TIMEOUT_SECS", default_value_t = 10)]
    pub get_timeout_secs: u64,

    #[arg(long, env = "DRNAV_POST_TIMEOUT_SECS", default_value_t = 30)]
    pub post_timeout_secs: u64,

    /// Namespace of the controller; fixes the accepted inbound caller identity
    #[arg(long, env = "DRNAV_POD_NAMESPACE", default_value = "site-manager")]
    pub pod_namespace: String,

    /// YAML file with a `testing` section
    #[arg(long, env = "DRNAV_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// host:port for the Prometheus exporter
    #[arg(long, env = "DRNAV_METRICS_ADDR")]
    pub metrics_addr: Option<String>,
}

impl Args {
    pub fn families(&self) -> Families {
        Families {
            legacy_group: self.legacy_group.clone(),
            current_group: self.current_group.clone(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            get_timeout: Duration::from_secs(self.get_timeout_secs),
            post_timeout: Duration::from_secs(self.post_timeout_secs),
            back_auth: self.back_http_auth,
        }
    }

    pub fn token_refresh(&self) -> Duration { Duration::from_secs(self.token_refresh_secs.max(1)) }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    testing: TestingConfig,
}

/// Static registry and token used instead of the cluster.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct TestingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub services: BTreeMap<String, CanonicalService>,
}

impl TestingConfig {
    pub fn registry(&self) -> ServiceRegistry { self.services.clone().into_iter().collect() }
}

/// Parse the config document; `None` unless testing mode is enabled.
pub fn parse_testing(doc: &str) -> Result<Option<TestingConfig>> {
    let file: ConfigFile = serde_yaml::from_str(doc).context("parsing config file")?;
    Ok(file.testing.enabled.then_some(file.testing))
}

pub fn load_testing(path: &Path) -> Result<Option<TestingConfig>> {
    let doc = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_testing(&doc)
}
