#![warn(missing_docs)]

//! `cirrus` binary entry point.

use anyhow::Result;
use cirrus_cli::cli::Cli;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!("cirrus starting with backend {:?}", cli.backend);
    cli.run().await
}
