//! Config command - print the effective configuration.

use std::path::Path;

use super::common::{load_config, ConfigSource};
use crate::error::CliError;

/// Run the config command.
pub fn run(config_path: Option<&Path>) -> Result<(), CliError> {
    let (config, source) = load_config(config_path)?;
    let streaming = &config.streaming;

    match source {
        ConfigSource::File(path) => println!("Config file: {}", path.display()),
        ConfigSource::Defaults => println!("Config file: (none, using defaults)"),
    }
    println!();

    println!("[streaming]");
    println!("packets_per_tick   = {}", streaming.packets_per_tick);
    println!(
        "tick_interval_ms   = {}",
        streaming.tick_interval.as_millis()
    );
    match streaming.stall_timeout {
        Some(timeout) => println!("stall_timeout_secs = {}", timeout.as_secs()),
        None => println!("stall_timeout_secs = 0 (disabled)"),
    }
    println!();

    println!("[missing]");
    match streaming.fallback.default {
        Some(texture) => println!("texture = {}", texture),
        None => println!("texture = (not set)"),
    }
    if !streaming.fallback.per_agent.is_empty() {
        println!();
        println!("[missing.agents]");
        let mut overrides: Vec<_> = streaming.fallback.per_agent.iter().collect();
        overrides.sort_by_key(|(agent, _)| agent.to_string());
        for (agent, texture) in overrides {
            println!("{} = {}", agent, texture);
        }
    }
    println!();

    println!("[logging]");
    println!("level     = {}", config.logging.level);
    match &config.logging.directory {
        Some(dir) => println!("directory = {}", dir.display()),
        None => println!("directory = (stderr only)"),
    }

    Ok(())
}
