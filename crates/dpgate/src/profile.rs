//! Device profiles: which channels a device class has and which DPs each
//! one owns.
//!
//! A profile is plain data. The built-in ones cover the switch, dimmer
//! and siren classes in the field; anything else can be described in JSON and
//! loaded with [`DeviceProfile::from_json`].
//!
//! ```json
//! {
//!   "name": "switch_2_gang",
//!   "channels": [
//!     { "gang": 1, "bindings": [{ "dp": 1, "datatype": "bool", "capability": "on_off" }] },
//!     { "gang": 2, "bindings": [{ "dp": 2, "datatype": "bool", "capability": "on_off" }] }
//!   ]
//! }
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use dpgate_channel::{ALARM_MELODIES, Capability, ChannelConfig, DpBinding};
use dpgate_protocol::{ChannelId, DpId};
use serde::{Deserialize, Serialize};

use crate::DpGateError;

/// Power-on behavior DP shared by every gang of a 4-gang switch and the
/// dimmer. Always owned by the main channel.
pub const POWER_ON_DP: u8 = 14;

/// Backlight DP of the dimmer. Owned by the main channel.
pub const BACKLIGHT_DP: u8 = 21;

/// Battery DP of the siren.
pub const SIREN_BATTERY_DP: u8 = 15;

/// How often the siren's battery is asked for.
const SIREN_BATTERY_POLL_SECS: u64 = 4 * 60 * 60;

/// One gang of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelProfile {
    /// 1-based gang number. Gang 1 is the main channel.
    pub gang: u8,
    pub bindings: Vec<DpBinding>,
}

impl ChannelProfile {
    pub fn new(gang: u8, bindings: impl IntoIterator<Item = DpBinding>) -> Self {
        Self {
            gang,
            bindings: bindings.into_iter().collect(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.gang == ChannelId::MAIN_GANG
    }

    pub fn dps(&self) -> impl Iterator<Item = DpId> + '_ {
        self.bindings.iter().map(|b| b.dp)
    }
}

/// DPs that are asked for periodically, on top of the startup query and
/// rejoin syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollProfile {
    pub dps: Vec<DpId>,
    pub interval_secs: u64,
}

impl PollProfile {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Everything needed to attach a node of one device class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,

    /// Reliability constants shared by every channel of the device.
    /// Defaults to the relay preset.
    #[serde(default)]
    pub config: ChannelConfig,

    pub channels: Vec<ChannelProfile>,

    #[serde(default)]
    pub poll: Option<PollProfile>,
}

impl DeviceProfile {
    /// Parses and validates a profile.
    ///
    /// # Errors
    /// [`DpGateError::ProfileJson`] for malformed JSON,
    /// [`DpGateError::InvalidProfile`] if [`validate`](Self::validate)
    /// rejects it.
    pub fn from_json(json: &str) -> Result<Self, DpGateError> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Looks up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<Self> {
        let profile = match name {
            "switch_1_gang" => Self::single_switch(),
            "switch_2_gang" => Self::switch(2),
            "switch_3_gang" => Self::switch(3),
            "switch_4_gang" => Self::four_gang_switch(),
            "switch_6_gang" => Self::switch(6),
            "dimmer_3_gang" => Self::dimmer_3_gang(),
            "siren" => Self::siren(),
            _ => return None,
        };
        Some(profile)
    }

    /// A single relay on DP 1.
    pub fn single_switch() -> Self {
        Self::switch(1)
    }

    /// `gangs` relays, gang N on DP N. No shared settings.
    pub fn switch(gangs: u8) -> Self {
        Self {
            name: format!("switch_{gangs}_gang"),
            config: ChannelConfig::relay(),
            channels: (1..=gangs)
                .map(|gang| ChannelProfile::new(gang, [DpBinding::on_off(gang)]))
                .collect(),
            poll: None,
        }
    }

    /// Four relays on DP 1..=4. The main channel also owns the power-on
    /// behavior DP.
    pub fn four_gang_switch() -> Self {
        let mut profile = Self::switch(4);
        profile.channels[0]
            .bindings
            .push(DpBinding::setting(POWER_ON_DP, Capability::PowerOnBehavior));
        profile
    }

    /// Three dimmable outputs.
    ///
    /// | gang | on/off | brightness | min | max |
    /// |------|--------|------------|-----|-----|
    /// | 1    | 1      | 2          | 3   | 5   |
    /// | 2    | 7      | 8          | 9   | 11  |
    /// | 3    | 15     | 16         | 17  | 19  |
    ///
    /// The main channel also owns power-on behavior (DP 14) and backlight
    /// (DP 21). Outputs are mechanically loaded, so the fan preset applies.
    pub fn dimmer_3_gang() -> Self {
        const LAYOUT: [(u8, u8, u8, u8); 3] = [(1, 2, 3, 5), (7, 8, 9, 11), (15, 16, 17, 19)];

        let mut channels: Vec<ChannelProfile> = LAYOUT
            .iter()
            .zip(1u8..)
            .map(|(&(on_off, brightness, min, max), gang)| {
                ChannelProfile::new(
                    gang,
                    [
                        DpBinding::on_off(on_off),
                        DpBinding::brightness(brightness),
                        DpBinding::level(min, Capability::MinimumBrightness),
                        DpBinding::level(max, Capability::MaximumBrightness),
                    ],
                )
            })
            .collect();
        channels[0].bindings.extend([
            DpBinding::setting(POWER_ON_DP, Capability::PowerOnBehavior),
            DpBinding::setting(BACKLIGHT_DP, Capability::BacklightMode),
        ]);

        Self {
            name: "dimmer_3_gang".into(),
            config: ChannelConfig::fan(),
            channels,
            poll: None,
        }
    }

    /// A battery-powered siren on one channel.
    ///
    /// | DP | capability        | type              |
    /// |----|-------------------|-------------------|
    /// | 5  | alarm volume      | enum 0..=2        |
    /// | 7  | alarm duration    | value, seconds    |
    /// | 13 | alarm             | bool              |
    /// | 15 | battery           | value, percent    |
    /// | 21 | alarm melody      | enum 0..=17       |
    ///
    /// The battery is polled every four hours.
    pub fn siren() -> Self {
        Self {
            name: "siren".into(),
            config: ChannelConfig::relay(),
            channels: vec![ChannelProfile::new(
                ChannelId::MAIN_GANG,
                [
                    DpBinding::setting(5, Capability::AlarmVolume),
                    DpBinding::value(7, Capability::AlarmDuration),
                    DpBinding::alarm(13),
                    DpBinding::value(SIREN_BATTERY_DP, Capability::MeasureBattery),
                    DpBinding::choice(21, Capability::AlarmMelody, ALARM_MELODIES.len() as u8),
                ],
            )],
            poll: Some(PollProfile {
                dps: vec![DpId(SIREN_BATTERY_DP)],
                interval_secs: SIREN_BATTERY_POLL_SECS,
            }),
        }
    }

    /// Checks the profile is attachable.
    ///
    /// - there is at least one channel and a main channel;
    /// - gang numbers are non-zero and distinct;
    /// - no DP is owned twice;
    /// - device-wide settings (power-on behavior, backlight) sit on the
    ///   main channel;
    /// - polled DPs are owned and the poll interval is non-zero.
    ///
    /// # Errors
    /// [`DpGateError::InvalidProfile`] naming the first problem found.
    pub fn validate(&self) -> Result<(), DpGateError> {
        let invalid = |reason: String| DpGateError::InvalidProfile {
            name: self.name.clone(),
            reason,
        };

        if !self.channels.iter().any(ChannelProfile::is_main) {
            return Err(invalid("no main channel (gang 1)".into()));
        }

        let mut gangs = BTreeSet::new();
        let mut dps = BTreeSet::new();
        for channel in &self.channels {
            if channel.gang == 0 {
                return Err(invalid("gang numbers start at 1".into()));
            }
            if !gangs.insert(channel.gang) {
                return Err(invalid(format!("gang {} defined twice", channel.gang)));
            }
            for binding in &channel.bindings {
                if !dps.insert(binding.dp) {
                    return Err(invalid(format!("{} owned twice", binding.dp)));
                }
                let device_wide = matches!(
                    binding.capability,
                    Capability::PowerOnBehavior | Capability::BacklightMode
                );
                if device_wide && !channel.is_main() {
                    return Err(invalid(format!(
                        "{} ({}) must be owned by the main channel",
                        binding.dp, binding.capability
                    )));
                }
            }
        }

        if let Some(poll) = &self.poll {
            if poll.interval_secs == 0 {
                return Err(invalid("poll interval must be non-zero".into()));
            }
            if let Some(dp) = poll.dps.iter().find(|dp| !dps.contains(*dp)) {
                return Err(invalid(format!("polled {dp} is not owned")));
            }
        }
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================
