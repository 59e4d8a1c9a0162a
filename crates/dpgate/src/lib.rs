//! # dpgate
//!
//! Data-point protocol adapter for multi-gang mesh switches, dimmers and
//! sirens.
//!
//! One physical node exposes several gangs over a single endpoint and a
//! single cluster. dpgate splits it into independent logical channels,
//! gives each a reliable command path (debounce, serialization, timeout,
//! retry), routes every inbound DP report to the one channel that owns it,
//! and re-syncs cached state when the node rejoins the mesh. Host-facing
//! changes come out through a [`CapabilityPublisher`].
//!
//! ## Layers
//!
//! | crate               | job                                        |
//! |---------------------|--------------------------------------------|
//! | `dpgate-protocol`   | DP frames, datatype codec, wire layout     |
//! | `dpgate-transport`  | `DpTransport` trait, in-memory transport   |
//! | `dpgate-channel`    | logical channels, momentary mode, publish  |
//! | `dpgate-node`       | ownership registry, router, rejoin sync    |
//! | `dpgate` (this)     | device profiles and the [`Adapter`] facade |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dpgate::prelude::*;
//!
//! # async fn demo() -> Result<(), DpGateError> {
//! let (transport, events) = MemoryTransport::with_device();
//! let adapter = Arc::new(Adapter::new(
//!     Arc::new(transport),
//!     Arc::new(RecordingPublisher::new()),
//!     AdapterConfig::default(),
//! ));
//!
//! let node = NodeId(0x2f01);
//! adapter.attach(node, &DeviceProfile::four_gang_switch(), None)?;
//!
//! let pump = Arc::clone(&adapter);
//! tokio::spawn(async move { pump.run(events).await });
//!
//! adapter.set_on_off(ChannelId::new(node, 3), true).await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod error;
mod profile;
mod settings;
pub mod telemetry;

pub use adapter::{Adapter, EventOutcome};
pub use error::DpGateError;
pub use profile::{
    BACKLIGHT_DP, ChannelProfile, DeviceProfile, POWER_ON_DP, PollProfile, SIREN_BATTERY_DP,
};
pub use settings::{AdapterConfig, BacklightMode, PowerOnBehavior, SirenMelody, SirenVolume};

pub use dpgate_channel::{
    Capability, CapabilityPublisher, CapabilityValue, ChannelConfig, ChannelSettings,
    CommandError, DpBinding, PublishError, PublishedEvent, STATE_CHANGED, SwitchMode,
    TriggerTokens,
};
pub use dpgate_node::{RejoinConfig, RejoinDecision, RouteOutcome};
pub use dpgate_protocol::{ChannelId, DataPointFrame, Datatype, DecodedValue, DpId, NodeId};
pub use dpgate_transport::{DpTransport, NodeEvent, NodeEventKind, TransportError};

/// Everything an embedding needs in one import.
pub mod prelude {
    pub use crate::{
        Adapter, AdapterConfig, BacklightMode, Capability, CapabilityPublisher, CapabilityValue,
        ChannelConfig, ChannelId, ChannelSettings, DataPointFrame, Datatype, DecodedValue,
        DeviceProfile, DpGateError, DpId, DpTransport, EventOutcome, NodeEvent, NodeId,
        PowerOnBehavior, PublishError, SirenMelody, SirenVolume, SwitchMode, TriggerTokens,
    };

    pub use dpgate_channel::RecordingPublisher;

    #[cfg(feature = "memory")]
    pub use dpgate_transport::{MemoryTransport, WriteOutcome};
}
