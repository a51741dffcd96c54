//! INI configuration file.
//!
//! ```ini
//! [streaming]
//! packets_per_tick = 20
//! tick_interval_ms = 50
//! ; 0 or absent disables the stall timeout
//! stall_timeout_secs = 0
//!
//! [missing]
//! texture = 5748decc-f629-461c-9a36-a35a221fe21f
//!
//! [missing.agents]
//! 0e2f3a64-1c1d-4c36-9a47-0f7cc2c5e1b0 = 9a2d4e16-8c0f-4a5e-b8a4-3f6b1c2d7e90
//!
//! [logging]
//! level = info
//! directory = /var/log/texstream
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use super::{FallbackPolicy, LoggingConfig, StreamConfig};
use crate::transfer::{AgentId, TextureId};

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or parsed.
    #[error("Failed to load config file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// The text is not valid INI.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    /// A key holds a value of the wrong shape.
    #[error("Invalid value for [{section}] {key}: {value:?}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// Settings loaded from an INI file.
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    pub streaming: StreamConfig,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Load from a file. Missing sections and keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        Self::from_ini(&ini)
    }

    /// Default location: `<config dir>/texstream/config.ini`.
    pub fn default_path(config_dir: &Path) -> PathBuf {
        config_dir.join("texstream").join("config.ini")
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("streaming")) {
            let streaming = &mut config.streaming;
            if let Some(packets) = parse_key::<u32>(section, "streaming", "packets_per_tick")? {
                streaming.packets_per_tick = packets;
            }
            if let Some(ms) = parse_key::<u64>(section, "streaming", "tick_interval_ms")? {
                if ms == 0 {
                    return Err(invalid("streaming", "tick_interval_ms", "0"));
                }
                streaming.tick_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = parse_key::<u64>(section, "streaming", "stall_timeout_secs")? {
                streaming.stall_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }

        let mut fallback = FallbackPolicy::none();
        if let Some(section) = ini.section(Some("missing")) {
            fallback.default = parse_key::<TextureId>(section, "missing", "texture")?;
        }
        if let Some(section) = ini.section(Some("missing.agents")) {
            for (agent, texture) in section.iter() {
                let agent = AgentId::from_str(agent.trim())
                    .map_err(|_| invalid("missing.agents", agent, texture))?;
                let texture = TextureId::from_str(texture.trim())
                    .map_err(|_| invalid("missing.agents", &agent.to_string(), texture))?;
                fallback.per_agent.insert(agent, texture);
            }
        }
        config.streaming.fallback = fallback;

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(level) = parse_key::<String>(section, "logging", "level")? {
                config.logging.level = level;
            }
            if let Some(dir) = parse_key::<PathBuf>(section, "logging", "directory")? {
                config.logging.directory = Some(dir);
            }
            if let Some(prefix) = parse_key::<String>(section, "logging", "file_prefix")? {
                config.logging.file_prefix = prefix;
            }
        }

        Ok(config)
    }
}

fn invalid(section: &str, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Parse an optional key; empty values count as absent.
fn parse_key<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match section.get(key).map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| invalid(section_name, key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[streaming]
packets_per_tick = 12
tick_interval_ms = 25
stall_timeout_secs = 30

[missing]
texture = 5748decc-f629-461c-9a36-a35a221fe21f

[missing.agents]
0e2f3a64-1c1d-4c36-9a47-0f7cc2c5e1b0 = 9a2d4e16-8c0f-4a5e-b8a4-3f6b1c2d7e90

[logging]
level = texstream=debug
directory = /tmp/texstream-logs
"#;

    #[test]
    fn test_parse_full_file() {
        let config = ConfigFile::parse(FULL).unwrap();

        assert_eq!(config.streaming.packets_per_tick, 12);
        assert_eq!(config.streaming.tick_interval, Duration::from_millis(25));
        assert_eq!(config.streaming.stall_timeout, Some(Duration::from_secs(30)));

        let agent: AgentId = "0e2f3a64-1c1d-4c36-9a47-0f7cc2c5e1b0".parse().unwrap();
        let default: TextureId = "5748decc-f629-461c-9a36-a35a221fe21f".parse().unwrap();
        let special: TextureId = "9a2d4e16-8c0f-4a5e-b8a4-3f6b1c2d7e90".parse().unwrap();
        assert_eq!(config.streaming.fallback.fallback_for(agent), Some(special));
        assert_eq!(
            config.streaming.fallback.fallback_for(AgentId::random()),
            Some(default)
        );

        assert_eq!(config.logging.level, "texstream=debug");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/tmp/texstream-logs"))
        );
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ConfigFile::parse("").unwrap();
        assert_eq!(
            config.streaming.packets_per_tick,
            super::super::DEFAULT_PACKETS_PER_TICK
        );
        assert!(config.streaming.stall_timeout.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_stall_timeout_disables() {
        let config = ConfigFile::parse("[streaming]\nstall_timeout_secs = 0\n").unwrap();
        assert!(config.streaming.stall_timeout.is_none());
    }

    #[test]
    fn test_invalid_number_names_key() {
        let err = ConfigFile::parse("[streaming]\npackets_per_tick = lots\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { section, key, value } => {
                assert_eq!(section, "streaming");
                assert_eq!(key, "packets_per_tick");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_fallback_uuid() {
        let err = ConfigFile::parse("[missing]\ntexture = nope\n").unwrap_err();
        assert!(err.to_string().contains("[missing] texture"));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        assert!(ConfigFile::parse("[streaming]\ntick_interval_ms = 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[streaming]\npackets_per_tick = 3\n").unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.streaming.packets_per_tick, 3);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigFile::load(&dir.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }
}
