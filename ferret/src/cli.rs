//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ferret is a distributed search server.
#[derive(Parser, Debug)]
#[command(name = "ferret", version)]
pub struct Cli {
    /// Path to the configuration file. Default: "ferret.toml"
    #[arg(short, long, default_value = "ferret.toml")]
    pub config: PathBuf,

    /// Data directory override.
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Node name override.
    #[arg(long)]
    pub node_name: Option<String>,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server.
    Run {
        /// Remote protocol port override.
        #[arg(long)]
        remote_port: Option<u16>,

        /// Replication protocol port override.
        #[arg(long)]
        replication_port: Option<u16>,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["ferret"]);
        assert_eq!(cli.config, PathBuf::from("ferret.toml"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "ferret",
            "--data",
            "/var/lib/ferret",
            "run",
            "--remote-port",
            "9990",
        ]);
        assert_eq!(cli.data, Some(PathBuf::from("/var/lib/ferret")));
        match cli.command {
            Some(Commands::Run { remote_port, .. }) => assert_eq!(remote_port, Some(9990)),
            _ => panic!("expected run command"),
        }
    }
}
