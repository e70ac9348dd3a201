//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// NATS authorization callout service
#[derive(Parser, Debug)]
#[command(name = "nats-callout")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "NATS_CALLOUT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Broker URL, overrides `server.url`
    #[arg(short, long, env = "NATS_CALLOUT_URL")]
    pub url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "NATS_CALLOUT_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "NATS_CALLOUT_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to serve)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the broker and answer authorization requests (default)
    Serve,

    /// Load and provision the configuration, then print the policy list
    Check,

    /// Generate an account key pair for `callout.signing_key`
    Keygen,

    /// Print the broker authorization block for the internal auth account,
    /// reusing `callout.internal_seed_file` so a later `serve` keeps the issuer
    Bootstrap {
        /// Emit YAML instead of JSON
        #[arg(long)]
        yaml: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::parse_from(["nats-callout"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::parse_from(["nats-callout", "check", "--config", "callout.yaml"]);
        assert!(matches!(cli.command, Some(Command::Check)));
        assert_eq!(cli.config, Some(PathBuf::from("callout.yaml")));
    }

    #[test]
    fn bootstrap_accepts_yaml_flag() {
        let cli = Cli::parse_from(["nats-callout", "bootstrap", "--yaml"]);
        assert!(matches!(cli.command, Some(Command::Bootstrap { yaml: true })));
    }
}
