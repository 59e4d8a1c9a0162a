//! Adapter-wide configuration and the device-wide setting values.

use std::fmt;
use std::str::FromStr;

use dpgate_channel::ChannelSettings;
use dpgate_node::RejoinConfig;
use serde::{Deserialize, Serialize};

/// Configuration for an [`Adapter`](crate::Adapter).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Rejoin debounce, stabilization and query timing.
    pub rejoin: RejoinConfig,

    /// Settings applied to channels attached without explicit settings.
    pub channel_defaults: ChannelSettings,
}

macro_rules! enum_setting {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal => $word:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// The enumerant written to the DP.
            pub fn dp_value(self) -> u8 {
                match self {
                    $(Self::$variant => $value),+
                }
            }

            /// Every variant, in declaration order.
            pub fn all() -> &'static [Self] {
                &[$(Self::$variant),+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $word),+
                })
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($word => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }
    };
}

enum_setting! {
    /// What the outputs do when mains power returns.
    PowerOnBehavior {
        Off = 0 => "off",
        On = 1 => "on",
        Memory = 2 => "memory",
    }
}

enum_setting! {
    /// Indicator backlight behavior.
    BacklightMode {
        Off = 0 => "off",
        Normal = 1 => "normal",
        Inverted = 2 => "inverted",
    }
}

enum_setting! {
    /// How loud the siren sounds.
    SirenVolume {
        Low = 0 => "low",
        Medium = 1 => "medium",
        High = 2 => "high",
    }
}

enum_setting! {
    /// The tune the siren plays.
    SirenMelody {
        DoorbellChime = 0 => "doorbell_chime",
        FurElise = 1 => "fur_elise",
        WestminsterChimes = 2 => "westminster_chimes",
        FastDoubleDoorBell = 3 => "fast_double_door_bell",
        WilliamTellOverture = 4 => "william_tell_overture",
        TurkishMarch = 5 => "turkish_march",
        SecurityAlarm = 6 => "security_alarm",
        ChemicalSpillAlert = 7 => "chemical_spill_alert",
        PiercingAlarmClock = 8 => "piercing_alarm_clock",
        SmokeAlarm = 9 => "smoke_alarm",
        DogBarking = 10 => "dog_barking",
        PoliceSiren = 11 => "police_siren",
        DoorbellChimeReverb = 12 => "doorbell_chime_reverb",
        MechanicalTelephone = 13 => "mechanical_telephone",
        FireAmbulance = 14 => "fire_ambulance",
        Elevator = 15 => "elevator",
        BuzzingAlarmClock = 16 => "buzzing_alarm_clock",
        SchoolBell = 17 => "school_bell",
    }
}
