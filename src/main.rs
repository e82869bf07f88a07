use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sluice::util::Shutdown;

/// Control plane of a distributed pub/sub broker.
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about)]
struct Cli {
    /// Location of the config file.
    #[arg(long, value_name = "PATH", default_value = "Config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = sluice::config::config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let _guard = sluice::logger::init(&config.log)?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutting down");
        signal.shutdown();
    })?;

    sluice::sluice(&cli.config, shutdown).await?;
    Ok(())
}
