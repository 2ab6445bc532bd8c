use std::sync::Arc;

use anyhow::Context;

use bulkimport_api::app::{self, ImportServices};
use bulkimport_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bulkimport_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        ImportServices::from_config(&config)
            .await
            .context("failed to wire import services")?,
    );
    let app = app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, workers = config.workers, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // Workers may block on the runtime, so join them off the async threads.
    tokio::task::spawn_blocking(move || services.shutdown_executor()).await?;
    tracing::info!("import executor stopped");
    Ok(())
}
