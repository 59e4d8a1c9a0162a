use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dpgate::prelude::*;
use dpgate::telemetry;

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

/// Stands in for the host: logs every capability update and trigger.
#[derive(Default)]
struct HostLog {
    values: AtomicUsize,
    triggers: AtomicUsize,
}

impl HostLog {
    fn values(&self) -> usize {
        self.values.load(Ordering::Relaxed)
    }

    fn triggers(&self) -> usize {
        self.triggers.load(Ordering::Relaxed)
    }
}

impl CapabilityPublisher for HostLog {
    fn publish_value(
        &self,
        channel: ChannelId,
        capability: &str,
        value: &CapabilityValue,
    ) -> Result<(), PublishError> {
        self.values.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%channel, capability, %value, "capability updated");
        Ok(())
    }

    fn publish_trigger(
        &self,
        channel: ChannelId,
        event: &str,
        tokens: &TriggerTokens,
    ) -> Result<(), PublishError> {
        self.triggers.fetch_add(1, Ordering::Relaxed);
        let token = |name: &str| tokens.get(name).map(ToString::to_string).unwrap_or_default();
        tracing::info!(
            %channel,
            event,
            capability = %token("capability"),
            from = %token("from"),
            to = %token("to"),
            "trigger fired"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

const NODE: NodeId = NodeId(0x2f01);

fn gang(n: u8) -> ChannelId {
    ChannelId::new(NODE, n)
}

/// Drives a simulated 4-gang switch through a typical session.
async fn run_scenario() -> Result<Arc<HostLog>, DpGateError> {
    let (transport, events) = MemoryTransport::with_device();
    let transport = Arc::new(transport);
    let host = Arc::new(HostLog::default());
    let adapter = Arc::new(Adapter::new(
        Arc::clone(&transport),
        Arc::clone(&host),
        AdapterConfig::default(),
    ));

    // Gang 2 was left on before the adapter started.
    transport.set_device_state(
        NODE,
        DataPointFrame::new(DpId(2), Datatype::Bool, vec![1]),
    );

    adapter.attach(NODE, &DeviceProfile::four_gang_switch(), None)?;
    let pump = {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move { adapter.run(events).await })
    };

    // Startup query picks up gang 2.
    tokio::time::sleep(Duration::from_secs(4)).await;

    adapter.set_on_off(gang(1), true).await?;
    adapter
        .set_power_on_behavior(gang(1), PowerOnBehavior::Memory)
        .await?;

    // Gang 4 drives a door opener: press, then release after a second.
    adapter.set_switch_mode(gang(4), SwitchMode::Momentary)?;
    adapter.set_on_off(gang(4), true).await?;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Someone presses gang 3 at the wall.
    transport.inject(NodeEvent::reporting(
        NODE,
        DataPointFrame::new(DpId(3), Datatype::Bool, vec![1]),
    ));

    // The node drops off the mesh and comes back.
    transport.inject(NodeEvent::online(NODE));
    tokio::time::sleep(Duration::from_secs(4)).await;

    adapter.shutdown();
    transport.shutdown();
    if let Err(e) = pump.await {
        tracing::error!(error = %e, "event loop task failed");
    }

    Ok(host)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();

    let host = run_scenario().await?;

    tracing::info!(
        values = host.values(),
        triggers = host.triggers(),
        "gang-switch demo finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scenario_fires_one_trigger_per_change() {
        let host = run_scenario().await.unwrap();

        // Gang 2 found on, gang 1 on, power-on to memory, gang 4 on and
        // back off, gang 3 pressed. Echoes and rejoin responses change
        // nothing.
        assert_eq!(host.triggers(), 6);
        assert!(host.values() >= host.triggers());
    }
}
