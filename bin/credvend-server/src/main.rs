//! credvend Server - Credential vending HTTP service
//!
//! Serves the credential REST API over the bundled in-memory catalog and
//! exposes Prometheus metrics.

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use credvend_common::VendingConfig;
use credvend_core::{InMemoryCatalog, MetricsObserver, VendingCoordinator};
use credvend_provider::ProviderRegistry;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "credvend-server")]
#[command(about = "Credential vending service for cloud object stores")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CREDVEND_CONFIG", default_value = "/etc/credvend/server.toml")]
    config: String,

    /// Listen address for the REST API (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

/// Load the configuration file (optional) and `CREDVEND__*` overrides
fn load_config(path: &str) -> Result<VendingConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(Path::new(path)).required(false))
        .add_source(
            config::Environment::with_prefix("CREDVEND")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read configuration from {path}"))?;

    settings
        .try_deserialize()
        .with_context(|| format!("invalid configuration in {path}"))
}

fn init_logging(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| args.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move {
                (
                    StatusCode::OK,
                    [(
                        header::CONTENT_TYPE,
                        "text/plain; version=0.0.4; charset=utf-8",
                    )],
                    handle.render(),
                )
                    .into_response()
            }
        }),
    )
}

/// Fail fast on storages whose declared providers cannot be built
fn validate_storages(catalog: &InMemoryCatalog, registry: &ProviderRegistry) -> Result<()> {
    for storage in catalog.storage_configs() {
        registry
            .validate(&storage)
            .with_context(|| format!("catalog {} has unusable credential providers", storage.id))?;
        if !storage.credential_types.is_empty() {
            info!(
                "Catalog {} vends {}",
                storage.id,
                storage
                    .credential_types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args.config)?;
    let listen = args.listen.unwrap_or(config.server.listen);

    info!("Starting credvend server");

    // Metrics recorder
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    // Catalog, providers and coordinator
    let catalog = Arc::new(InMemoryCatalog::from_config(&config.metalakes));
    let registry = Arc::new(ProviderRegistry::with_builtin());
    validate_storages(&catalog, &registry)?;
    info!(
        "Registered credential types: {}",
        registry
            .registered_types()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let coordinator = Arc::new(VendingCoordinator::new(
        catalog,
        registry,
        &config.cache,
        Arc::new(MetricsObserver),
    ));

    // Periodic purge of expired credentials
    let sweeper = {
        let coordinator = coordinator.clone();
        let prometheus = prometheus.clone();
        let period = Duration::from_secs(config.cache.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let purged = coordinator.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "credential cache sweep");
                }
                prometheus.run_upkeep();
            }
        })
    };

    let mut app = credvend_rest::router(coordinator, config.access.anonymous_permission)
        .layer(TraceLayer::new_for_http());

    match config.server.metrics_listen {
        Some(metrics_addr) => {
            let listener = TcpListener::bind(metrics_addr).await?;
            info!("Serving metrics on {}", metrics_addr);
            let metrics = metrics_router(prometheus);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, metrics.into_make_service()).await {
                    tracing::error!("Metrics server failed: {}", e);
                }
            });
        }
        None => app = app.merge(metrics_router(prometheus)),
    }

    info!("Starting credential API on {}", listen);

    let listener = TcpListener::bind(listen).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server shut down gracefully");

    Ok(())
}
