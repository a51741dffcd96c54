//! texstream CLI - Command-line interface
//!
//! Drives the texstream library against synthetic clients and inspects its
//! configuration.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use texstream::logging::init_logging;

use commands::common::load_config;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "texstream", version, about = "Progressive texture streaming core")]
struct Cli {
    /// Configuration file (default: <config dir>/texstream/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `texstream=trace` (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Stream textures to one synthetic client and report what was sent
    Simulate {
        /// Directory of `<uuid>.j2c` assets (default: generated in memory)
        #[arg(long)]
        assets: Option<PathBuf>,

        /// Number of generated textures
        #[arg(long, default_value_t = 16)]
        textures: usize,

        /// Size of each generated texture in bytes
        #[arg(long, default_value_t = 20_600)]
        size: usize,

        /// Quality layers per decoded image
        #[arg(
            long,
            default_value_t = texstream::source::LayeredDecoder::default().layer_count()
        )]
        layers: usize,

        /// Packet budget per tick (overrides the config file)
        #[arg(long)]
        packets_per_tick: Option<u32>,

        /// Requested discard level (0 = full resolution)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        discard_level: i8,

        /// Stop after this many seconds
        #[arg(long)]
        time_limit: Option<u64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let (config, _) = load_config(cli.config.as_deref())?;
    let mut logging = config.logging;
    if let Some(level) = cli.log_level {
        logging.level = level;
    }
    let _guard = init_logging(&logging)?;

    match cli.command {
        Commands::Simulate {
            assets,
            textures,
            size,
            layers,
            packets_per_tick,
            discard_level,
            time_limit,
            json,
        } => commands::simulate::run(SimulateArgs {
            config: cli.config,
            assets,
            textures,
            size,
            layers,
            packets_per_tick,
            discard_level,
            time_limit,
            json,
        }),
        Commands::Config => commands::config::run(cli.config.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_overrides() {
        let cli = Cli::try_parse_from([
            "texstream",
            "simulate",
            "--textures",
            "4",
            "--packets-per-tick",
            "8",
            "--discard-level",
            "-1",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Simulate {
                textures,
                packets_per_tick,
                discard_level,
                json,
                ..
            } => {
                assert_eq!(textures, 4);
                assert_eq!(packets_per_tick, Some(8));
                assert_eq!(discard_level, -1);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
