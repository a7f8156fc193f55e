use anyhow::Context;
use artifortress::core::RawConfig;
use artifortress::service::ArtifactService;
use artifortress::web;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let raw: RawConfig = match std::env::var("ARTIFORTRESS_CONFIG") {
        Ok(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&contents).with_context(|| format!("parsing config file {path}"))?
        }
        Err(_) => RawConfig::default(),
    };
    let config = raw.normalize();
    let bind_addr = config.http.bind_addr.clone();

    let service = Arc::new(ArtifactService::new(config));
    let sweepers = service.spawn_sweepers();
    for sweeper in &sweepers {
        info!(sweeper = sweeper.name(), "background sweeper running");
    }

    let app = web::router(service);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(%bind_addr, "artifortress listening");
    axum::serve(listener, app).await.context("serving http")?;

    for sweeper in sweepers {
        sweeper.stop().await;
    }
    Ok(())
}
