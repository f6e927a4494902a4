use std::sync::Arc;

use adk_catalog::{CatalogConfig, CatalogService, PostgresCatalogSource};
use adk_catalog_server::run_server;
use anyhow::Context;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CatalogConfig::load().context("failed to load configuration")?;
    let service =
        Arc::new(CatalogService::from_config(config).context("failed to build catalog service")?);

    let startup = service.clone();
    tokio::spawn(async move {
        let source_config = &startup.config().source;
        if !source_config.enabled {
            startup.reconcile_startup(None).await;
            return;
        }
        match PostgresCatalogSource::connect_lazy(source_config) {
            Ok(source) => {
                startup.reconcile_startup(Some(&source)).await;
                source.close().await;
            }
            Err(e) => {
                warn!(error = %e, "catalog source unavailable, skipping reconciliation");
                startup.reconcile_startup(None).await;
                startup.mark_degraded(format!("catalog source: {e}")).await;
            }
        }
    });

    run_server(service).await
}
