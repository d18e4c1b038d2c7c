use anyhow::Result;
use clap::Parser;
use kleister_server::{Config, cli::Cli};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env()?,
        )
        .init();
    kleister_server::run(Config::from_cli(cli)?).await
}
