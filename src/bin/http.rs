#[cfg(feature = "http_api")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::net::SocketAddr;

    use task_engine::config::{EngineConfig, HTTP_ADDR_ENV};
    use task_engine::logging::init_logging;
    use task_engine::metadata::ProjectMetadata;
    use task_engine::{TaskManager, http_api};

    init_logging(None);

    let addr: SocketAddr = std::env::var(HTTP_ADDR_ENV)
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;

    let config = EngineConfig::from_env()?;
    let manager = TaskManager::with_config(config, ProjectMetadata::default())?;
    tracing::info!(%addr, "task-engine HTTP API listening");
    http_api::serve(addr, manager).await?;
    Ok(())
}

#[cfg(not(feature = "http_api"))]
fn main() {
    eprintln!("Rebuild with the `http_api` feature to enable the HTTP server.");
}
