pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "talosmon")]
#[command(author = "CyCore Systems")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Liveness and service-state monitor for a fleet of Talos machines", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        help = "Configuration file (default: <config dir>/talosmon/config.yaml)"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Cluster to monitor (default: first configured)")]
    pub cluster: Option<String>,

    #[arg(long, global = true, default_value = "debug.log", help = "Debug log file")]
    pub log_file: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Print one status snapshot of every machine")]
    Status {
        #[arg(long, default_value = "3000", help = "Milliseconds to let probes settle")]
        settle_ms: u64,

        #[arg(short, long = "service", help = "Service to show (repeatable)")]
        services: Vec<String>,
    },
    #[command(about = "Reprint machine status until interrupted")]
    Watch {
        #[arg(short, long, default_value = "2000", help = "Refresh interval in milliseconds")]
        interval_ms: u64,

        #[arg(short, long = "service", help = "Service to show (repeatable)")]
        services: Vec<String>,
    },
    #[command(about = "Validate the configuration file without probing")]
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch() {
        let cli = Cli::try_parse_from([
            "talosmon",
            "--cluster",
            "lab",
            "watch",
            "-i",
            "500",
            "--service",
            "etcd",
        ])
        .unwrap();

        assert_eq!(cli.cluster.as_deref(), Some("lab"));
        assert_eq!(cli.log_file, PathBuf::from("debug.log"));
        match cli.command {
            Some(Commands::Watch {
                interval_ms,
                services,
            }) => {
                assert_eq!(interval_ms, 500);
                assert_eq!(services, vec!["etcd"]);
            }
            _ => panic!("expected watch"),
        }
    }
}
