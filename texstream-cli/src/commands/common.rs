//! Common utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use texstream::ConfigFile;

use crate::error::CliError;

/// Where the configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from this file.
    File(PathBuf),
    /// No file found; built-in defaults.
    Defaults,
}

/// Default configuration file path, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| ConfigFile::default_path(&dir))
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, the default location is used
/// when present, otherwise built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<(ConfigFile, ConfigSource), CliError> {
    match explicit {
        Some(path) => Ok((ConfigFile::load(path)?, ConfigSource::File(path.to_path_buf()))),
        None => match default_config_path().filter(|path| path.exists()) {
            Some(path) => Ok((ConfigFile::load(&path)?, ConfigSource::File(path))),
            None => Ok((ConfigFile::default(), ConfigSource::Defaults)),
        },
    }
}
