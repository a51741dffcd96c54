//! Configuration for the streaming core.
//!
//! [`StreamConfig`] holds everything one client's image manager needs;
//! [`ConfigFile`] loads it (plus logging settings) from an INI file.

mod file;

pub use file::{ConfigError, ConfigFile};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::{AgentId, TextureId};

/// Default packet budget per tick.
pub const DEFAULT_PACKETS_PER_TICK: u32 = 20;

/// Default interval between ticks (in milliseconds).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log file name prefix.
pub const DEFAULT_LOG_FILE_PREFIX: &str = "texstream.log";

/// Streaming configuration for one client.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Packets the scheduler may send per tick.
    pub packets_per_tick: u32,

    /// Interval at which a session drives ticks.
    pub tick_interval: Duration,

    /// Fail transfers that wait on fetch/decode longer than this.
    ///
    /// `None` (the default) lets a transfer wait indefinitely; the client is
    /// expected to cancel it.
    pub stall_timeout: Option<Duration>,

    /// Substitute textures for identities that failed.
    pub fallback: FallbackPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            packets_per_tick: DEFAULT_PACKETS_PER_TICK,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            stall_timeout: None,
            fallback: FallbackPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the packet budget per tick.
    pub fn with_packets_per_tick(mut self, packets: u32) -> Self {
        self.packets_per_tick = packets;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Enable the stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Set the fallback policy.
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }
}

/// Which texture stands in for one that failed to load.
///
/// A per-agent override wins over the default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Texture substituted for every client without an override.
    pub default: Option<TextureId>,

    /// Per-client substitutes.
    pub per_agent: HashMap<AgentId, TextureId>,
}

impl FallbackPolicy {
    /// No fallback: failed textures are fetched again when re-requested.
    pub fn none() -> Self {
        Self::default()
    }

    /// The same fallback for every client.
    pub fn with_default(texture: TextureId) -> Self {
        Self {
            default: Some(texture),
            per_agent: HashMap::new(),
        }
    }

    /// Add a per-client override.
    pub fn with_agent(mut self, agent: AgentId, texture: TextureId) -> Self {
        self.per_agent.insert(agent, texture);
        self
    }

    /// Fallback texture for `agent`, if any.
    pub fn fallback_for(&self, agent: AgentId) -> Option<TextureId> {
        self.per_agent.get(&agent).copied().or(self.default)
    }
}

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Filter directive (e.g. `info`, `texstream=debug`). `RUST_LOG` overrides it.
    pub level: String,

    /// Directory for daily rolling log files. `None` logs to stderr only.
    pub directory: Option<PathBuf>,

    /// Log file name prefix.
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
            file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
        }
    }
}

impl LoggingConfig {
    /// Set the filter directive.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Log to files in `directory` as well as stderr.
    pub fn with_directory(mut self, directory: PathBuf) -> Self {
        self.directory = Some(directory);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.packets_per_tick, DEFAULT_PACKETS_PER_TICK);
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert!(config.stall_timeout.is_none());
        assert_eq!(config.fallback, FallbackPolicy::none());
    }

    #[test]
    fn test_builder_pattern() {
        let fallback = TextureId::random();
        let config = StreamConfig::new()
            .with_packets_per_tick(8)
            .with_tick_interval(Duration::from_millis(10))
            .with_stall_timeout(Duration::from_secs(30))
            .with_fallback(FallbackPolicy::with_default(fallback));

        assert_eq!(config.packets_per_tick, 8);
        assert_eq!(config.tick_interval, Duration::from_millis(10));
        assert_eq!(config.stall_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.fallback.default, Some(fallback));
    }

    #[test]
    fn test_fallback_prefers_agent_override() {
        let default = TextureId::random();
        let special = TextureId::random();
        let vip = AgentId::random();
        let policy = FallbackPolicy::with_default(default).with_agent(vip, special);

        assert_eq!(policy.fallback_for(vip), Some(special));
        assert_eq!(policy.fallback_for(AgentId::random()), Some(default));
        assert_eq!(FallbackPolicy::none().fallback_for(vip), None);
    }
}
