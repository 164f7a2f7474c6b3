use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tether",
    about = "Tether: object-graph persistence and replication",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Read settings from this TOML file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the effective configuration
    Config(ConfigArgs),
    /// Run a client and a server session in process
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Print only the location of the configuration file
    #[arg(long)]
    pub path: bool,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Push every batch through the wire codec
    #[arg(long)]
    pub encoded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let cli = Cli::try_parse_from(["tether", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigArgs { path: false })));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_config_path_with_file() {
        let cli = Cli::try_parse_from(["tether", "config", "--path", "-c", "/etc/tether.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigArgs { path: true })));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tether.toml")));
    }

    #[test]
    fn parse_demo_encoded() {
        let cli = Cli::try_parse_from(["tether", "demo", "--encoded", "-v"]).unwrap();
        if let Command::Demo(args) = cli.command {
            assert!(args.encoded);
        } else { panic!("wrong command"); }
        assert!(cli.verbose);
    }

    #[test]
    fn unknown_commands_fail() {
        assert!(Cli::try_parse_from(["tether", "serve"]).is_err());
    }
}
