//! Streaming subsystem configuration

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Rate-control group name applied to connect admission checks.
pub const CONNECT_GROUP: &str = "sse:connect";

/// Streaming subsystem configuration.
///
/// # Example
///
/// ```toml
/// [stream]
/// retry_ms = 15000
/// send_buffer = 32
/// keep_alive_interval_secs = 0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Reconnection delay hint in milliseconds, sent as the first frame
    /// of every connection (default: 15000).
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,

    /// Outbound frame queue depth per channel (default: 32).
    ///
    /// Writes await queue capacity when the client falls behind, so this
    /// bounds memory per slow consumer.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,

    /// Keep-alive comment interval in seconds (0 = disabled, default: 0).
    #[serde(default)]
    pub keep_alive_interval_secs: u64,

    /// Rate-control group for connect admission (default: "sse:connect").
    #[serde(default = "default_connect_group")]
    pub connect_group: String,
}

impl StreamConfig {
    /// Get the client retry hint as a Duration.
    #[must_use]
    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    /// Get the keep-alive interval, or None if disabled.
    #[must_use]
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        if self.keep_alive_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keep_alive_interval_secs))
        }
    }

    /// Load configuration from a specific file.
    ///
    /// Defaults are merged first, then the TOML file (if it exists), then
    /// `PUSHSTREAM_`-prefixed environment variables.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(StreamConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PUSHSTREAM_"))
            .extract()?;

        Ok(config)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retry_ms: default_retry_ms(),
            send_buffer: default_send_buffer(),
            keep_alive_interval_secs: 0,
            connect_group: default_connect_group(),
        }
    }
}

fn default_retry_ms() -> u64 {
    15_000
}

fn default_send_buffer() -> usize {
    32
}

fn default_connect_group() -> String {
    CONNECT_GROUP.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.retry_ms, 15_000);
        assert_eq!(config.send_buffer, 32);
        assert_eq!(config.keep_alive_interval_secs, 0);
        assert_eq!(config.connect_group, "sse:connect");
    }

    #[test]
    fn test_retry_duration() {
        let config = StreamConfig::default();
        assert_eq!(config.retry(), Duration::from_millis(15_000));
    }

    #[test]
    fn test_keep_alive_disabled_by_default() {
        let mut config = StreamConfig::default();
        assert!(config.keep_alive_interval().is_none());

        config.keep_alive_interval_secs = 20;
        assert_eq!(config.keep_alive_interval(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let config = StreamConfig::load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.retry_ms, 15_000);
    }
}
