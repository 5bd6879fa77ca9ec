mod analysis;
mod auth;
mod cli;
mod config;
mod error;
mod models;
mod pipeline;
mod providers;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting shipgate - quality-gated deployments");
    cli.execute().await?;

    Ok(())
}
