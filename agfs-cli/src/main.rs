//! `agfs`: mount the providers from a config file and run one operation.
//!
//! Usage:
//!   agfs --config agfs.toml ls /
//!   agfs --config agfs.toml write /mem/a.txt hello

use agfs_cli::{CliConfig, Command, build_router, execute, exit_code};
use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "agfs")]
#[command(about = "Run filesystem operations against AGFS mounts")]
struct Args {
    /// Mount configuration file. Defaults to ~/.agfs/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print structured output as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if let Err(e) = run(&args).await {
        error!("{e:#}");
        std::process::exit(exit_code(&e));
    }
}

async fn run(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::load_default()?,
    };
    let router = build_router(&config).await?;

    let mut stdout = std::io::stdout().lock();
    let result = execute(&router, &args.command, args.json, &mut stdout).await;
    stdout.flush()?;
    router.shutdown().await;
    result
}
