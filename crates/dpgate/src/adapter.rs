//! The adapter: nodes in, capabilities out.
//!
//! [`Adapter`] owns every piece of the stack for any number of nodes
//! sharing one transport and one host publisher:
//!
//! ```text
//!   host command ──→ Adapter ──→ LogicalChannel ──→ DpTransport
//!                                     ↑
//!   NodeEvent ──→ handle_event ──→ InboundRouter ──→ CapabilityPublisher
//!            └──→ NodeSync (online / announce)
//! ```
//!
//! # Locks
//!
//! `nodes`, the registry and `modes` are std locks held only for short,
//! non-awaiting sections. When more than one is taken, the order is
//! `nodes` → registry → `modes`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard, Weak};
use std::time::Duration;

use dpgate_channel::{
    Capability, CapabilityPublisher, ChannelSettings, CommandError, LogicalChannel,
    MomentaryController, RevertErrorHook, SwitchMode,
};
use dpgate_node::{
    ChannelRegistry, InboundRouter, NodeSync, RejoinDecision, RouteOutcome, SharedRegistry,
};
use dpgate_protocol::{ChannelId, Datatype, DecodedValue, DpId, NodeId};
use dpgate_transport::{DpTransport, NodeEvent, NodeEventKind};
use tokio::sync::mpsc;

use crate::{
    AdapterConfig, BacklightMode, DeviceProfile, DpGateError, PowerOnBehavior, SirenMelody,
    SirenVolume,
};

/// Full-scale value of brightness DPs.
const LEVEL_SCALE: f64 = 1000.0;

/// Pause between configuring the siren and sounding it.
const ALARM_SETTLE: Duration = Duration::from_millis(200);

/// Alarm duration used until the siren reports its own.
const DEFAULT_ALARM_SECS: u64 = 10;

const BEEP_SECS: u64 = 2;

type Channel<T, P> = Arc<LogicalChannel<T, P>>;

/// Per-channel host settings and the momentary controller they drive.
struct ChannelMode<T, P> {
    settings: ChannelSettings,
    /// `None` for channels without an on/off DP.
    momentary: Option<Arc<MomentaryController<T, P>>>,
}

/// What [`Adapter::handle_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A `reporting` / `response` frame went through the router.
    Routed(RouteOutcome),
    /// An `online` / `announce` event went to the node's rejoin handling.
    Rejoin(RejoinDecision),
    /// The event names a node that is not attached.
    Ignored,
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Protocol adapter for a set of multi-gang nodes.
pub struct Adapter<T, P> {
    transport: Arc<T>,
    publisher: Arc<P>,
    config: AdapterConfig,
    registry: SharedRegistry<T, P>,
    router: InboundRouter<T, P>,
    nodes: Mutex<HashMap<NodeId, Arc<NodeSync<T, P>>>>,
    modes: Mutex<HashMap<ChannelId, ChannelMode<T, P>>>,
}

impl<T: DpTransport, P: CapabilityPublisher> Adapter<T, P> {
    pub fn new(transport: Arc<T>, publisher: Arc<P>, config: AdapterConfig) -> Self {
        let registry: SharedRegistry<T, P> = Arc::new(RwLock::new(ChannelRegistry::new()));
        Self {
            transport,
            publisher,
            config,
            router: InboundRouter::new(Arc::clone(&registry)),
            registry,
            nodes: Mutex::new(HashMap::new()),
            modes: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, ChannelRegistry<Channel<T, P>>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Attaches `node` as a device described by `profile`.
    ///
    /// Creates one logical channel per gang, registers DP ownership, and
    /// schedules the startup query. Every channel starts with `settings`,
    /// or with [`AdapterConfig::channel_defaults`] when `None`. Must be
    /// called from within a Tokio runtime.
    ///
    /// Returns the new channel ids, by gang.
    ///
    /// # Errors
    /// - [`DpGateError::InvalidProfile`] if the profile does not validate.
    /// - [`DpGateError::NodeAttached`] if `node` is already attached.
    /// - [`DpGateError::Registry`] if ownership cannot be registered.
    ///   Nothing stays registered in that case.
    pub fn attach(
        &self,
        node: NodeId,
        profile: &DeviceProfile,
        settings: Option<ChannelSettings>,
    ) -> Result<Vec<ChannelId>, DpGateError> {
        profile.validate()?;
        let settings = settings.unwrap_or_else(|| self.config.channel_defaults.clone());

        let mut nodes = lock(&self.nodes);
        if nodes.contains_key(&node) {
            return Err(DpGateError::NodeAttached(node));
        }

        let channels: Vec<Channel<T, P>> = profile
            .channels
            .iter()
            .map(|c| {
                Arc::new(LogicalChannel::new(
                    ChannelId::new(node, c.gang),
                    c.bindings.iter().cloned(),
                    profile.config.clone(),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.publisher),
                ))
            })
            .collect();

        {
            let mut registry = self.write_registry();
            for (i, channel) in channels.iter().enumerate() {
                let registered =
                    registry.register(node, channel.id(), channel.owned_dps(), Arc::clone(channel));
                if let Err(e) = registered {
                    for done in &channels[..i] {
                        registry.unregister(done.id());
                    }
                    return Err(e.into());
                }
            }
        }

        let sync = NodeSync::new(
            node,
            Arc::clone(&self.registry),
            self.config.rejoin.clone(),
        );

        {
            let mut modes = lock(&self.modes);
            for channel in &channels {
                let momentary = channel.binding_for(Capability::OnOff).map(|b| {
                    let controller = MomentaryController::new(
                        Arc::clone(channel),
                        b.dp,
                        settings.momentary_timeout(),
                    )
                    .on_revert_error(unavailable_hook(Arc::downgrade(&sync)));
                    Arc::new(controller)
                });
                modes.insert(
                    channel.id(),
                    ChannelMode {
                        settings: settings.clone(),
                        momentary,
                    },
                );
            }
        }

        sync.schedule_initial_query();
        if let Some(poll) = &profile.poll {
            sync.schedule_poll(poll.dps.clone(), poll.interval());
        }
        nodes.insert(node, sync);

        tracing::info!(%node, profile = %profile.name, channels = channels.len(), "node attached");
        Ok(channels.iter().map(|c| c.id()).collect())
    }

    /// Detaches `node`: pending sync work is aborted, momentary timers are
    /// cancelled, channels are closed and their DPs released. Commands still
    /// waiting on a closed channel end with `ChannelClosed`.
    ///
    /// # Errors
    /// [`DpGateError::NodeNotAttached`] if `node` is unknown.
    pub fn detach(&self, node: NodeId) -> Result<(), DpGateError> {
        let mut nodes = lock(&self.nodes);
        let sync = nodes
            .remove(&node)
            .ok_or(DpGateError::NodeNotAttached(node))?;
        sync.shutdown();

        let removed: Vec<Channel<T, P>> = {
            let mut registry = self.write_registry();
            let ids = registry.channels_of(node);
            ids.into_iter()
                .filter_map(|id| registry.unregister(id))
                .collect()
        };

        let mut modes = lock(&self.modes);
        for channel in &removed {
            if let Some(momentary) = modes.remove(&channel.id()).and_then(|m| m.momentary) {
                momentary.cancel();
            }
            channel.close();
        }

        tracing::info!(%node, channels = removed.len(), "node detached");
        Ok(())
    }

    /// Detaches every node.
    pub fn shutdown(&self) {
        let attached: Vec<NodeId> = lock(&self.nodes).keys().copied().collect();
        for node in attached {
            // Only fails if a concurrent detach got there first.
            let _ = self.detach(node);
        }
        tracing::info!("adapter shut down");
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Attached channels of `node`, by gang.
    pub fn channels(&self, node: NodeId) -> Vec<ChannelId> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .channels_of(node)
    }

    pub fn channel(&self, id: ChannelId) -> Option<Channel<T, P>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn node_sync(&self, node: NodeId) -> Option<Arc<NodeSync<T, P>>> {
        lock(&self.nodes).get(&node).cloned()
    }

    /// `false` once a command met an unreachable node, until the next
    /// accepted rejoin. `false` for nodes that are not attached.
    pub fn is_available(&self, node: NodeId) -> bool {
        self.node_sync(node).is_some_and(|s| s.is_available())
    }

    /// Current host settings of `channel`.
    pub fn settings(&self, channel: ChannelId) -> Option<ChannelSettings> {
        lock(&self.modes).get(&channel).map(|m| m.settings.clone())
    }

    fn require_channel(&self, id: ChannelId) -> Result<Channel<T, P>, DpGateError> {
        self.channel(id).ok_or(DpGateError::ChannelNotFound(id))
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Handles one event from the transport.
    ///
    /// Frames are routed to the owning channel; `online` and `announce`
    /// go to the node's rejoin handling.
    pub fn handle_event(&self, event: NodeEvent) -> EventOutcome {
        let node = event.node;
        match event.kind {
            NodeEventKind::Reporting(frame) | NodeEventKind::Response(frame) => {
                EventOutcome::Routed(self.router.on_frame(node, &frame))
            }
            NodeEventKind::Online | NodeEventKind::Announce => match self.node_sync(node) {
                Some(sync) => EventOutcome::Rejoin(sync.on_rejoin_candidate()),
                None => {
                    tracing::debug!(%node, "rejoin event for unattached node ignored");
                    EventOutcome::Ignored
                }
            },
        }
    }

    /// Feeds events to [`handle_event`](Self::handle_event) until the
    /// stream ends.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<NodeEvent>) {
        tracing::info!("adapter event loop running");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        tracing::info!("event stream ended, adapter event loop stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Sends a raw DP value through `channel`'s reliable command path.
    ///
    /// # Errors
    /// [`DpGateError::ChannelNotFound`], or the [`CommandError`] from
    /// [`LogicalChannel::send`]. A `TransportUnavailable` failure also
    /// marks the node unavailable.
    pub async fn send(
        &self,
        channel: ChannelId,
        dp: DpId,
        datatype: Datatype,
        value: DecodedValue,
    ) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        let result = handle.send(dp, datatype, value).await;
        self.settle(result)
    }

    /// Switches `channel` on or off.
    ///
    /// In momentary mode the command reverts after the channel's momentary
    /// timeout.
    pub async fn set_on_off(&self, channel: ChannelId, on: bool) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        if handle.binding_for(Capability::OnOff).is_none()
            && handle.binding_for(Capability::Alarm).is_some()
        {
            return self.set_alarm(channel, on).await;
        }
        let momentary = lock(&self.modes)
            .get(&channel)
            .filter(|m| m.settings.switch_mode == SwitchMode::Momentary)
            .and_then(|m| m.momentary.clone());

        match momentary {
            Some(controller) => {
                let result = controller.command(on).await;
                self.settle(result)
            }
            None => {
                self.write(&handle, Capability::OnOff, DecodedValue::Bool(on))
                    .await
            }
        }
    }

    /// Sets the brightness of a dimmable channel, `level` in `0.0..=1.0`.
    ///
    /// A level that scales to a non-zero brightness writes the brightness
    /// DP and shows the channel as on, since the device switches on by
    /// itself. One that scales to zero switches the channel off instead of
    /// writing brightness 0.
    pub async fn set_level(&self, channel: ChannelId, level: f64) -> Result<(), DpGateError> {
        let raw = fraction_to_raw(Capability::Dim, level)?;
        let handle = self.require_channel(channel)?;

        if raw > 0 {
            self.write(&handle, Capability::Dim, DecodedValue::Value(raw))
                .await?;
            if let Some(on_off) = handle.binding_for(Capability::OnOff) {
                handle.apply_report(on_off.dp, DecodedValue::Bool(true));
            }
            Ok(())
        } else {
            self.write(&handle, Capability::OnOff, DecodedValue::Bool(false))
                .await
        }
    }

    /// Sets the power-on behavior. Only the main channel carries it.
    pub async fn set_power_on_behavior(
        &self,
        channel: ChannelId,
        behavior: PowerOnBehavior,
    ) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        self.write(
            &handle,
            Capability::PowerOnBehavior,
            DecodedValue::Enum(behavior.dp_value()),
        )
        .await
    }

    /// Sets the backlight mode. Only the main channel carries it.
    pub async fn set_backlight_mode(
        &self,
        channel: ChannelId,
        mode: BacklightMode,
    ) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        self.write(
            &handle,
            Capability::BacklightMode,
            DecodedValue::Enum(mode.dp_value()),
        )
        .await
    }

    /// Sets the lowest brightness the output dims to, as a fraction.
    pub async fn set_min_brightness(
        &self,
        channel: ChannelId,
        fraction: f64,
    ) -> Result<(), DpGateError> {
        self.set_brightness_limit(channel, Capability::MinimumBrightness, fraction)
            .await
    }

    /// Sets the highest brightness the output dims to, as a fraction.
    pub async fn set_max_brightness(
        &self,
        channel: ChannelId,
        fraction: f64,
    ) -> Result<(), DpGateError> {
        self.set_brightness_limit(channel, Capability::MaximumBrightness, fraction)
            .await
    }

    async fn set_brightness_limit(
        &self,
        channel: ChannelId,
        capability: Capability,
        fraction: f64,
    ) -> Result<(), DpGateError> {
        let raw = fraction_to_raw(capability, fraction)?;
        let handle = self.require_channel(channel)?;
        self.write(&handle, capability, DecodedValue::Value(raw))
            .await
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Changes how on/off commands on `channel` behave. Any armed
    /// momentary revert is cancelled when the mode changes.
    pub fn set_switch_mode(&self, channel: ChannelId, mode: SwitchMode) -> Result<(), DpGateError> {
        let mut modes = lock(&self.modes);
        let entry = modes
            .get_mut(&channel)
            .ok_or(DpGateError::ChannelNotFound(channel))?;
        if entry.settings.switch_mode == mode {
            return Ok(());
        }
        if let Some(momentary) = &entry.momentary {
            momentary.cancel();
        }
        entry.settings.switch_mode = mode;
        tracing::info!(%channel, ?mode, "switch mode changed");
        Ok(())
    }

    /// Changes the momentary revert delay of `channel`. Applies from the
    /// next command on.
    pub fn set_momentary_timeout(&self, channel: ChannelId, secs: u64) -> Result<(), DpGateError> {
        let mut modes = lock(&self.modes);
        let entry = modes
            .get_mut(&channel)
            .ok_or(DpGateError::ChannelNotFound(channel))?;
        entry.settings.momentary_timeout_secs = secs;
        if let Some(momentary) = &entry.momentary {
            momentary.set_timeout(entry.settings.momentary_timeout());
        }
        tracing::debug!(%channel, secs, "momentary timeout changed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Siren
    // -----------------------------------------------------------------------

    /// Sounds or silences a siren.
    ///
    /// Before sounding, the melody, volume and duration are written again
    /// (the last known values, or fur elise, high and 10 s), so the siren
    /// never plays with settings it lost while asleep. Also reached through
    /// [`set_on_off`](Self::set_on_off) on a siren channel.
    pub async fn set_alarm(&self, channel: ChannelId, on: bool) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        if handle.binding_for(Capability::Alarm).is_none() {
            return Err(DpGateError::Unsupported {
                channel,
                capability: Capability::Alarm,
            });
        }

        if on {
            let cached = |capability: Capability| {
                handle
                    .binding_for(capability)
                    .and_then(|b| handle.last_known(b.dp))
                    .and_then(|v| v.as_u64())
            };
            let melody = cached(Capability::AlarmMelody)
                .and_then(|m| u8::try_from(m).ok())
                .unwrap_or(SirenMelody::FurElise.dp_value());
            let volume = cached(Capability::AlarmVolume)
                .and_then(|v| u8::try_from(v).ok())
                .unwrap_or(SirenVolume::High.dp_value());
            let secs = cached(Capability::AlarmDuration).unwrap_or(DEFAULT_ALARM_SECS);
            self.prepare_alarm(&handle, melody, volume, secs).await?;
        }
        self.write(&handle, Capability::Alarm, DecodedValue::Bool(on))
            .await
    }

    /// Sounds a short fur elise at high volume, then silences the siren.
    /// Returns once the siren is silent again.
    pub async fn beep(&self, channel: ChannelId) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        self.prepare_alarm(
            &handle,
            SirenMelody::FurElise.dp_value(),
            SirenVolume::High.dp_value(),
            BEEP_SECS,
        )
        .await?;
        self.write(&handle, Capability::Alarm, DecodedValue::Bool(true))
            .await?;
        tokio::time::sleep(Duration::from_secs(BEEP_SECS)).await;
        self.write(&handle, Capability::Alarm, DecodedValue::Bool(false))
            .await
    }

    pub async fn set_alarm_volume(
        &self,
        channel: ChannelId,
        volume: SirenVolume,
    ) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        self.write(&handle, Capability::AlarmVolume, DecodedValue::Enum(volume.dp_value()))
            .await
    }

    pub async fn set_alarm_melody(
        &self,
        channel: ChannelId,
        melody: SirenMelody,
    ) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        self.write(&handle, Capability::AlarmMelody, DecodedValue::Enum(melody.dp_value()))
            .await
    }

    /// Sets how many seconds the siren sounds for.
    pub async fn set_alarm_duration(&self, channel: ChannelId, secs: u32) -> Result<(), DpGateError> {
        let handle = self.require_channel(channel)?;
        self.write(
            &handle,
            Capability::AlarmDuration,
            DecodedValue::Value(u64::from(secs)),
        )
        .await
    }

    /// Writes the sound settings the channel has, then waits for the siren
    /// to take them.
    async fn prepare_alarm(
        &self,
        handle: &LogicalChannel<T, P>,
        melody: u8,
        volume: u8,
        secs: u64,
    ) -> Result<(), DpGateError> {
        let settings = [
            (Capability::AlarmMelody, DecodedValue::Enum(melody)),
            (Capability::AlarmVolume, DecodedValue::Enum(volume)),
            (Capability::AlarmDuration, DecodedValue::Value(secs)),
        ];
        for (capability, value) in settings {
            if handle.binding_for(capability).is_some() {
                self.write(handle, capability, value).await?;
            }
        }
        tokio::time::sleep(ALARM_SETTLE).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn write(
        &self,
        handle: &LogicalChannel<T, P>,
        capability: Capability,
        value: DecodedValue,
    ) -> Result<(), DpGateError> {
        let binding = handle
            .binding_for(capability)
            .ok_or(DpGateError::Unsupported {
                channel: handle.id(),
                capability,
            })?;
        let result = handle.send(binding.dp, binding.datatype, value).await;
        self.settle(result)
    }

    /// Records availability from a command result.
    fn settle(&self, result: Result<(), CommandError>) -> Result<(), DpGateError> {
        if let Err(CommandError::TransportUnavailable(node)) = &result {
            if let Some(sync) = self.node_sync(*node) {
                sync.mark_unavailable();
            }
        }
        result.map_err(DpGateError::from)
    }
}

/// Marks the node unavailable when a background revert meets an
/// unreachable node, as a failed host command does.
fn unavailable_hook<T: DpTransport, P: CapabilityPublisher>(
    sync: Weak<NodeSync<T, P>>,
) -> RevertErrorHook {
    Arc::new(move |e: &CommandError| {
        if let CommandError::TransportUnavailable(_) = e {
            if let Some(sync) = sync.upgrade() {
                sync.mark_unavailable();
            }
        }
    })
}

/// Converts a host fraction to the 0..=1000 DP scale, rounding down.
fn fraction_to_raw(capability: Capability, fraction: f64) -> Result<u64, DpGateError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(DpGateError::InvalidSetting {
            capability,
            reason: format!("{fraction} is outside 0.0..=1.0"),
        });
    }
    Ok((fraction * LEVEL_SCALE).floor() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_to_raw_rounds_down() {
        assert_eq!(fraction_to_raw(Capability::Dim, 0.5).unwrap(), 500);
        assert_eq!(fraction_to_raw(Capability::Dim, 1.0).unwrap(), 1000);
        assert_eq!(fraction_to_raw(Capability::Dim, 0.0).unwrap(), 0);
        assert_eq!(fraction_to_raw(Capability::Dim, 0.0009).unwrap(), 0);
    }

    #[test]
    fn test_fraction_to_raw_out_of_range_is_rejected() {
        for bad in [-0.1, 1.5, f64::NAN] {
            assert!(matches!(
                fraction_to_raw(Capability::MinimumBrightness, bad),
                Err(DpGateError::InvalidSetting { .. })
            ));
        }
    }
}
