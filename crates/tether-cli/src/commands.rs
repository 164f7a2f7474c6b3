use anyhow::Context;
use colored::Colorize;
use tether_sdk::{init_tracing, TetherConfig};

use crate::cli::*;
use crate::demo;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    init_tracing(level).context("could not set up logging")?;

    match cli.command {
        Command::Config(args) => cmd_config(&cli.config, &config, args),
        Command::Demo(args) => demo::run(config, args.encoded).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<TetherConfig> {
    match &cli.config {
        Some(path) => TetherConfig::load(path)
            .with_context(|| format!("could not load {}", path.display())),
        None => Ok(TetherConfig::default()),
    }
}

fn cmd_config(
    file: &Option<std::path::PathBuf>,
    config: &TetherConfig,
    args: ConfigArgs,
) -> anyhow::Result<()> {
    if args.path {
        match file {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", "(built-in defaults)".dimmed()),
        }
        return Ok(());
    }
    print!("{}", config.to_toml_string()?);
    Ok(())
}
