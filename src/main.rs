use anyhow::Context;
use docsearch::{api, config, logging, processing::DocumentService};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let config = config::init_config().context("Failed to load configuration")?;

    let service = DocumentService::connect(config)
        .await
        .context("Failed to initialize document service")?;
    let app = api::create_router(Arc::new(service), config.max_upload_bytes);

    let listener = bind_listener(config.server_port)
        .await
        .with_context(|| format!("Failed to bind port {}", config.server_port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", config.server_port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn bind_listener(port: u16) -> Result<TcpListener, std::io::Error> {
    use std::net::Ipv4Addr;

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    tracing::debug!(port, "Bound server port");
    Ok(listener)
}
