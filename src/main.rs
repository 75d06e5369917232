mod auth;
mod cli;
mod config;
mod error;
mod models;
mod query;
mod report;
mod sources;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting ciscope - CI status aggregation tool");
    cli.execute().await?;

    Ok(())
}
