//! Channel configuration: reliability constants and per-channel settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ChannelConfig
// ---------------------------------------------------------------------------

/// Reliability constants for one device class.
///
/// These are fixed per class and never derived at runtime. Two presets
/// cover the devices in the field: [`relay`](Self::relay) for plain
/// switches and [`fan`](Self::fan) for mechanically loaded outputs that
/// need time between commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Minimum time between two successful commands on the same channel.
    pub min_interval_ms: u64,

    /// How long a single write attempt may take before it counts as failed.
    pub command_timeout_ms: u64,

    /// Total number of write attempts per command (not extra retries).
    pub max_retries: u32,

    /// Pause between a failed attempt and the next one.
    pub retry_delay_ms: u64,
}

impl ChannelConfig {
    /// Plain relay outputs: no debounce, 5 s timeout, 3 attempts, 500 ms apart.
    pub fn relay() -> Self {
        Self {
            min_interval_ms: 0,
            command_timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }

    /// Fan-class outputs: 2 s debounce, 20 s timeout, 3 attempts, 2 s apart.
    pub fn fan() -> Self {
        Self {
            min_interval_ms: 2_000,
            command_timeout_ms: 20_000,
            max_retries: 3,
            retry_delay_ms: 2_000,
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Attempts per command. Always at least one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::relay()
    }
}

// ---------------------------------------------------------------------------
// Host settings
// ---------------------------------------------------------------------------

/// How on/off commands are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    /// Commands latch.
    #[default]
    Switch,
    /// Commands revert after the momentary timeout.
    Momentary,
}

/// User-facing settings for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub switch_mode: SwitchMode,

    /// Seconds before a momentary command reverts.
    ///
    /// Default: 1 second.
    pub momentary_timeout_secs: u64,
}

impl ChannelSettings {
    pub fn momentary_timeout(&self) -> Duration {
        Duration::from_secs(self.momentary_timeout_secs)
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            switch_mode: SwitchMode::Switch,
            momentary_timeout_secs: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_preset_values() {
        let cfg = ChannelConfig::relay();
        assert_eq!(cfg.min_interval(), Duration::ZERO);
        assert_eq!(cfg.command_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_fan_preset_values() {
        let cfg = ChannelConfig::fan();
        assert_eq!(cfg.min_interval(), Duration::from_secs(2));
        assert_eq!(cfg.command_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.retry_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_attempts_never_zero() {
        let cfg = ChannelConfig {
            max_retries: 0,
            ..ChannelConfig::relay()
        };
        assert_eq!(cfg.attempts(), 1);
    }

    #[test]
    fn test_channel_settings_partial_json_uses_defaults() {
        let settings: ChannelSettings =
            serde_json::from_str(r#"{"switch_mode":"momentary"}"#).unwrap();
        assert_eq!(settings.switch_mode, SwitchMode::Momentary);
        assert_eq!(settings.momentary_timeout(), Duration::from_secs(1));
    }
}
