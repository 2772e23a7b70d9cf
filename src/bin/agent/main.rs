mod face;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use page_pilot::chrome::ChromeSurface;
use page_pilot::{Agent, Config, logging};
use std::sync::Arc;
use tracing::info;

/// Local agent: drives Chrome and serves the command UI.
#[derive(Parser)]
#[command(name = "agent", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = Cli::parse().config;
    logging::init("info");

    let store = Arc::new(config.open_store()?);
    info!(dir = %store.dir().display(), model = %config.model, "starting page pilot agent");

    // Chrome can take a while to come up.
    let surface = Arc::new(ChromeSurface::start(&config).await?);
    let agent = Arc::new(Agent::new(surface, store.clone(), &config));

    info!("ready, waiting for commands");
    face::serve(config.port, agent, store).await
}
