use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use hhrec_api::app::{build_app, services::build_services};
use hhrec_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hhrec_observability::init("hhrec-api");

    let settings = Settings::from_env().context("reading configuration")?;
    let services = Arc::new(build_services(&settings).await?);
    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    services.shutdown().await;
    info!("api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
