use std::future::IntoFuture;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use drnav_api::{Controller, DrnavApi};
use drnav_http::{api_router, webhook_router, AppState};
use drnav_kubehub::{
    refresh_from_file, spawn_file_refresh, BearerValidator, KubeStore, ObjectStore, StaticBearer, TokenCell,
    TokenReviewValidator,
};
use drnav_ops::{HttpTransport, Outbound};
use drnav_store::{live_api_versions, LiveSource, RegistrySource, StaticSource};
use tracing::{info, warn};

mod config;

use config::{load_testing, Args};

fn init_tracing() {
    let env = std::env::var("DRNAV_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        }
    } else {
        warn!(addr = %addr, "invalid DRNAV_METRICS_ADDR; expected host:port");
    }
}

/// Collaborators that differ between testing mode and a live cluster.
struct Wiring {
    source: Arc<dyn RegistrySource>,
    tokens: TokenCell,
    bearer: Arc<dyn BearerValidator>,
    lookup_store: Option<Arc<dyn ObjectStore>>,
}

async fn wire(args: &Args) -> Result<Wiring> {
    if let Some(path) = &args.config_file {
        if let Some(testing) = load_testing(path)? {
            info!(services = testing.services.len(), "testing mode: static registry, no cluster access");
            let tokens = TokenCell::new(testing.token.clone());
            return Ok(Wiring {
                source: Arc::new(StaticSource::new(testing.registry(), &args.http_scheme)),
                bearer: Arc::new(StaticBearer(tokens.get())),
                tokens,
                lookup_store: None,
            });
        }
    }

    let families = args.families();
    let [legacy, current] = live_api_versions(&families);
    let store = KubeStore::try_default(families).await?;
    info!(legacy = %legacy, current = %current, "live registry source");
    let bearer = Arc::new(TokenReviewValidator::new(store.client(), &args.pod_namespace));
    let store: Arc<dyn ObjectStore> = Arc::new(store);

    let tokens = TokenCell::default();
    if let Some(path) = &args.token_file {
        refresh_from_file(&tokens, path).await.with_context(|| format!("reading token file {}", path.display()))?;
        spawn_file_refresh(tokens.clone(), path.clone(), args.token_refresh());
    } else if args.back_http_auth {
        warn!("DRNAV_BACK_HTTP_AUTH is set without DRNAV_TOKEN_FILE; outbound bearer will be empty");
    }

    Ok(Wiring {
        source: Arc::new(LiveSource::new(store.clone(), args.http_scheme.clone())),
        tokens,
        bearer,
        lookup_store: Some(store),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler failed"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    init_metrics(args.metrics_addr.as_deref());

    let wiring = wire(&args).await?;
    let http = args.http_config();
    let transport = Arc::new(HttpTransport::new(&http).context("building HTTP client")?);
    let outbound = Outbound::new(transport, Arc::new(wiring.tokens.clone()), http.back_auth);
    let mut controller = Controller::new(wiring.source, Arc::new(outbound)).with_families(args.families());
    if let Some(store) = wiring.lookup_store {
        controller = controller.with_lookup_store(store);
    }
    let api: Arc<dyn DrnavApi> = Arc::new(controller);

    let mut state = AppState::new(api.clone());
    if args.front_http_auth {
        state = state.with_bearer(wiring.bearer);
    }

    let api_listener =
        tokio::net::TcpListener::bind(args.bind).await.with_context(|| format!("binding {}", args.bind))?;
    let hook_listener = tokio::net::TcpListener::bind(args.webhook_bind)
        .await
        .with_context(|| format!("binding {}", args.webhook_bind))?;
    info!(bind = %args.bind, webhook_bind = %args.webhook_bind, front_auth = args.front_http_auth, "drnavd listening");

    let api_srv = axum::serve(api_listener, api_router(state)).with_graceful_shutdown(shutdown_signal());
    let hook_srv = axum::serve(hook_listener, webhook_router(api)).with_graceful_shutdown(shutdown_signal());
    tokio::try_join!(api_srv.into_future(), hook_srv.into_future())?;
    info!("drnavd stopped");
    Ok(())
}
