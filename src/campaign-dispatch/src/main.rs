//! Campaign Dispatch: experiment assignment and batched delivery of email
//! campaigns.
//!
//! Main entry point that wires the stores, renderer and transport together
//! and starts the management API.

use campaign_channels::{DispatchScheduler, SendGridProvider};
use campaign_core::config::AppConfig;
use campaign_core::templates::TemplateRenderer;
use campaign_management::{
    management_router, CampaignSender, InMemoryRecipientDirectory, ManagementState,
    ManagementStore, ReconciliationSweep,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "campaign-dispatch")]
#[command(about = "Campaign experiment assignment and delivery dispatch")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Recipients per dispatch batch (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__DISPATCH__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Pause between dispatch batches in milliseconds (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__DISPATCH__INTER_BATCH_DELAY_MS")]
    inter_batch_delay_ms: Option<u64>,

    /// Do not run the stuck-campaign reconciliation sweep
    #[arg(long, default_value_t = false)]
    no_reconcile: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_dispatch=info,campaign_management=info,campaign_channels=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Dispatch starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(batch_size) = cli.batch_size {
        config.dispatch.batch_size = batch_size;
    }
    if let Some(delay) = cli.inter_batch_delay_ms {
        config.dispatch.inter_batch_delay_ms = delay;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        batch_size = config.dispatch.batch_size,
        inter_batch_delay_ms = config.dispatch.inter_batch_delay_ms,
        transport_timeout_ms = config.dispatch.transport_timeout_ms,
        "Configuration loaded"
    );

    if let Err(e) = start_metrics(&config) {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let store = Arc::new(ManagementStore::new());
    let directory = Arc::new(InMemoryRecipientDirectory::new());
    let transport = Arc::new(SendGridProvider::new(config.sendgrid.clone()));
    let scheduler = DispatchScheduler::new(&config.dispatch, transport, store.clone())?;
    let renderer = TemplateRenderer::new(&config.render);
    let sender = Arc::new(CampaignSender::new(
        store.clone(),
        directory.clone(),
        renderer,
        scheduler,
    ));

    if cli.no_reconcile {
        info!("Reconciliation sweep disabled");
    } else {
        let sweep = Arc::new(ReconciliationSweep::new(store.clone(), &config.reconcile));
        tokio::spawn(sweep.run());
    }

    let app = management_router(ManagementState {
        store,
        directory,
        sender,
    })
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(config.api.host.parse()?, config.api.http_port);
    info!(addr = %addr, "Campaign Dispatch is ready to serve traffic");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Install the Prometheus recorder and its scrape listener.
fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(
            config.api.host.parse()?,
            config.metrics.port,
        ))
        .install()?;
    info!(port = config.metrics.port, "Metrics exporter started");
    Ok(())
}
