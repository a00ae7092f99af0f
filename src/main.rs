//! model-hub binary.
//!
//! Configuration comes from the environment: `SERVER_PORT` for the listen
//! port (default 7766) and `CONFIG_PATH` for the model fleet description
//! (default `config.yaml`).

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use model_hub::{run_server, HubConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("model_hub=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let port = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(7766);

    let config = HubConfig::load_from_env().context("failed to load configuration")?;

    run_server(config, port).await
}
