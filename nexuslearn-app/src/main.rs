mod api;
mod cli;
mod config;

use anyhow::Result;
use clap::Parser; // needed for Cli::parse()
use tokio::runtime::Runtime;
use tracing_subscriber::{fmt, EnvFilter};

use cli::commands::run_cli;
use cli::opts::Cli;
use config::Config;

fn main() -> Result<()> {
    let args = Cli::parse();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load()?;
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }

    let rt = Runtime::new()?;
    rt.block_on(run_cli(args, config))
}
