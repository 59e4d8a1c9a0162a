//! Capabilities: the host-facing view of a DP.
//!
//! A [`DpBinding`] ties one DP owned by a channel to the capability it
//! drives. The binding decides how a decoded value looks to the host
//! (`dim` is a fraction, `power_on_behavior` is a word) and which values
//! a command may carry.

use std::fmt;

use dpgate_protocol::{Datatype, DecodedValue, DpId, ValueBounds};
use serde::{Deserialize, Serialize};

/// Full-scale brightness on the wire.
const BRIGHTNESS_SCALE: f64 = 1000.0;

const POWER_ON_BEHAVIOR: [&str; 3] = ["off", "on", "memory"];
const BACKLIGHT_MODE: [&str; 3] = ["off", "normal", "inverted"];
const ALARM_VOLUME: [&str; 3] = ["low", "medium", "high"];

/// Siren melodies, by enumerant.
pub const ALARM_MELODIES: [&str; 18] = [
    "doorbell_chime",
    "fur_elise",
    "westminster_chimes",
    "fast_double_door_bell",
    "william_tell_overture",
    "turkish_march",
    "security_alarm",
    "chemical_spill_alert",
    "piercing_alarm_clock",
    "smoke_alarm",
    "dog_barking",
    "police_siren",
    "doorbell_chime_reverb",
    "mechanical_telephone",
    "fire_ambulance",
    "elevator",
    "buzzing_alarm_clock",
    "school_bell",
];

/// Battery percentage below which `alarm_battery` is raised.
const LOW_BATTERY_PERCENT: u64 = 20;

/// Host capabilities a DP can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    OnOff,
    Dim,
    PowerOnBehavior,
    BacklightMode,
    MinimumBrightness,
    MaximumBrightness,
    /// The siren sounding. Shown to the host as on/off.
    Alarm,
    AlarmVolume,
    /// Seconds the siren sounds for.
    AlarmDuration,
    AlarmMelody,
    /// Battery charge in percent.
    MeasureBattery,
}

impl Capability {
    /// The name the host knows this capability by.
    pub fn name(self) -> &'static str {
        match self {
            Self::OnOff => "onoff",
            Self::Dim => "dim",
            Self::PowerOnBehavior => "power_on_behavior",
            Self::BacklightMode => "backlight_mode",
            Self::MinimumBrightness => "minimum_brightness",
            Self::MaximumBrightness => "maximum_brightness",
            Self::Alarm => "onoff",
            Self::AlarmVolume => "alarm_volume",
            Self::AlarmDuration => "alarm_duration",
            Self::AlarmMelody => "alarm_melody",
            Self::MeasureBattery => "measure_battery",
        }
    }

    /// What the host sees before anything is known.
    pub fn default_value(self) -> CapabilityValue {
        match self {
            Self::OnOff | Self::Alarm => CapabilityValue::Bool(false),
            Self::Dim
            | Self::MinimumBrightness
            | Self::MaximumBrightness
            | Self::AlarmDuration
            | Self::MeasureBattery => CapabilityValue::Number(0.0),
            Self::PowerOnBehavior => CapabilityValue::Text(POWER_ON_BEHAVIOR[0].into()),
            Self::BacklightMode => CapabilityValue::Text(BACKLIGHT_MODE[0].into()),
            Self::AlarmVolume => CapabilityValue::Text(ALARM_VOLUME[0].into()),
            Self::AlarmMelody => CapabilityValue::Text(ALARM_MELODIES[0].into()),
        }
    }

    /// Converts a decoded DP value into the host representation.
    ///
    /// Returns `None` when the value has no meaning for this capability
    /// (a string on an on/off DP, an enumerant outside the known set).
    pub fn to_host(self, value: &DecodedValue) -> Option<CapabilityValue> {
        match self {
            Self::OnOff | Self::Alarm => value.as_bool().map(CapabilityValue::Bool),
            Self::Dim | Self::MinimumBrightness | Self::MaximumBrightness => value
                .as_u64()
                .map(|v| CapabilityValue::Number((v as f64 / BRIGHTNESS_SCALE).clamp(0.0, 1.0))),
            Self::PowerOnBehavior => word(&POWER_ON_BEHAVIOR, value),
            Self::BacklightMode => word(&BACKLIGHT_MODE, value),
            Self::AlarmVolume => word(&ALARM_VOLUME, value),
            Self::AlarmMelody => word(&ALARM_MELODIES, value),
            Self::AlarmDuration => value.as_u64().map(|v| CapabilityValue::Number(v as f64)),
            Self::MeasureBattery => value
                .as_u64()
                .filter(|p| *p <= 100)
                .map(|p| CapabilityValue::Number(p as f64)),
        }
    }

    /// A second capability computed from the same DP, if any.
    ///
    /// `measure_battery` raises `alarm_battery` below 20 %.
    pub fn derived(self, value: &DecodedValue) -> Option<(&'static str, CapabilityValue)> {
        match self {
            Self::MeasureBattery => value
                .as_u64()
                .filter(|p| *p <= 100)
                .map(|p| ("alarm_battery", CapabilityValue::Bool(p < LOW_BATTERY_PERCENT))),
            _ => None,
        }
    }
}

fn word(words: &[&str], value: &DecodedValue) -> Option<CapabilityValue> {
    let index = usize::try_from(value.as_u64()?).ok()?;
    words.get(index).map(|w| CapabilityValue::Text((*w).into()))
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A capability value as published to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One DP owned by a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpBinding {
    pub dp: DpId,
    pub datatype: Datatype,
    pub capability: Capability,
    /// Legal command values. Reports are never bounds-checked.
    #[serde(default)]
    pub bounds: ValueBounds,
}

impl DpBinding {
    /// An on/off DP.
    pub fn on_off(dp: u8) -> Self {
        Self {
            dp: DpId(dp),
            datatype: Datatype::Bool,
            capability: Capability::OnOff,
            bounds: ValueBounds::Any,
        }
    }

    /// A 0..=1000 brightness DP.
    pub fn brightness(dp: u8) -> Self {
        Self::level(dp, Capability::Dim)
    }

    /// A 0..=1000 value DP for `capability`.
    pub fn level(dp: u8, capability: Capability) -> Self {
        Self {
            dp: DpId(dp),
            datatype: Datatype::Value,
            capability,
            bounds: ValueBounds::Range { min: 0, max: 1000 },
        }
    }

    /// A three-way enum setting DP (power-on behavior, backlight mode,
    /// alarm volume).
    pub fn setting(dp: u8, capability: Capability) -> Self {
        Self::choice(dp, capability, 3)
    }

    /// An enum DP taking `0..count`.
    pub fn choice(dp: u8, capability: Capability, count: u8) -> Self {
        Self {
            dp: DpId(dp),
            datatype: Datatype::Enum,
            capability,
            bounds: ValueBounds::OneOf {
                values: (0..count).collect(),
            },
        }
    }

    /// An unbounded value DP.
    pub fn value(dp: u8, capability: Capability) -> Self {
        Self {
            dp: DpId(dp),
            datatype: Datatype::Value,
            capability,
            bounds: ValueBounds::Any,
        }
    }

    /// A siren alarm DP.
    pub fn alarm(dp: u8) -> Self {
        Self {
            capability: Capability::Alarm,
            ..Self::on_off(dp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_host_dim_scales_and_clamps() {
        let dim = Capability::Dim;
        assert_eq!(
            dim.to_host(&DecodedValue::Value(500)),
            Some(CapabilityValue::Number(0.5))
        );
        assert_eq!(
            dim.to_host(&DecodedValue::Value(4000)),
            Some(CapabilityValue::Number(1.0))
        );
    }

    #[test]
    fn test_to_host_brightness_limits_are_fractions() {
        assert_eq!(
            Capability::MinimumBrightness.to_host(&DecodedValue::Value(150)),
            Some(CapabilityValue::Number(0.15))
        );
    }

    #[test]
    fn test_to_host_power_on_behavior_words() {
        let cap = Capability::PowerOnBehavior;
        assert_eq!(
            cap.to_host(&DecodedValue::Enum(2)),
            Some(CapabilityValue::Text("memory".into()))
        );
        assert_eq!(cap.to_host(&DecodedValue::Enum(5)), None);
    }

    #[test]
    fn test_to_host_onoff_rejects_strings() {
        assert_eq!(Capability::OnOff.to_host(&DecodedValue::String("on".into())), None);
    }

    #[test]
    fn test_default_values_are_false_and_zero() {
        assert_eq!(Capability::OnOff.default_value(), CapabilityValue::Bool(false));
        assert_eq!(Capability::Dim.default_value(), CapabilityValue::Number(0.0));
    }

    #[test]
    fn test_to_host_siren_settings() {
        assert_eq!(
            Capability::AlarmVolume.to_host(&DecodedValue::Enum(2)),
            Some(CapabilityValue::Text("high".into()))
        );
        assert_eq!(
            Capability::AlarmMelody.to_host(&DecodedValue::Enum(17)),
            Some(CapabilityValue::Text("school_bell".into()))
        );
        assert_eq!(Capability::AlarmMelody.to_host(&DecodedValue::Enum(18)), None);
        assert_eq!(
            Capability::AlarmDuration.to_host(&DecodedValue::Value(10)),
            Some(CapabilityValue::Number(10.0))
        );
        assert_eq!(Capability::Alarm.name(), "onoff");
    }

    #[test]
    fn test_battery_out_of_range_has_no_host_value() {
        let battery = Capability::MeasureBattery;
        assert_eq!(
            battery.to_host(&DecodedValue::Value(64)),
            Some(CapabilityValue::Number(64.0))
        );
        assert_eq!(battery.to_host(&DecodedValue::Value(101)), None);
        assert_eq!(battery.derived(&DecodedValue::Value(101)), None);
    }

    #[test]
    fn test_derived_low_battery_below_twenty_percent() {
        let battery = Capability::MeasureBattery;
        assert_eq!(
            battery.derived(&DecodedValue::Value(19)),
            Some(("alarm_battery", CapabilityValue::Bool(true)))
        );
        assert_eq!(
            battery.derived(&DecodedValue::Value(20)),
            Some(("alarm_battery", CapabilityValue::Bool(false)))
        );
        assert_eq!(Capability::Dim.derived(&DecodedValue::Value(5)), None);
    }

    #[test]
    fn test_choice_binding_bounds_every_enumerant() {
        let melody = DpBinding::choice(21, Capability::AlarmMelody, 18);
        assert_eq!(
            melody.bounds,
            ValueBounds::OneOf {
                values: (0..18).collect()
            }
        );
        assert_eq!(DpBinding::alarm(13).datatype, Datatype::Bool);
    }

    #[test]
    fn test_binding_deserializes_without_bounds() {
        let binding: DpBinding = serde_json::from_str(
            r#"{"dp":1,"datatype":"bool","capability":"on_off"}"#,
        )
        .unwrap();
        assert_eq!(binding, DpBinding::on_off(1));
    }

    #[test]
    fn test_capability_value_serializes_untagged() {
        assert_eq!(serde_json::to_string(&CapabilityValue::Bool(true)).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&CapabilityValue::Text("on".into())).unwrap(),
            r#""on""#
        );
    }
}
