//! MQTT bridge for the Tecomat Foxtrot PLC.
//!
//! Polls controller variables over TCP and publishes them to MQTT with
//! Home Assistant discovery.

use std::time::Duration;

use anyhow::{Context, Result};
use foxbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, BridgeStatus, Will, client};
use tokio::sync::mpsc;

use mqtt_bridge_foxtrot::config::FoxtrotBridgeConfig;
use mqtt_bridge_foxtrot::coordinator::{BRIDGE_NAME, BridgeCoordinator};
use mqtt_bridge_foxtrot::messaging::{EventLoopTiming, spawn_event_loop};
use mqtt_bridge_foxtrot::topics::TopicBuilder;

const MESSAGING_EVENT_CAPACITY: usize = 64;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("foxtrot.json5");

    let config = FoxtrotBridgeConfig::load_or_env(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let runner = BridgeRunner::new_with_args(BRIDGE_NAME, config, Some(&args))
        .context("Failed to initialize bridge")?;
    let config = runner.config().clone();

    tracing::info!(config = ?config.redacted(), "Loaded configuration");

    let topics = TopicBuilder::new(&config.mqtt.base_topic, &config.mqtt.discovery_prefix);
    let will = Will {
        topic: topics.status(),
        payload: BridgeStatus::offline(BRIDGE_NAME, runner.version())
            .to_payload()
            .context("Failed to encode last will")?,
    };

    let (mqtt_client, eventloop) = client::connect(&config.mqtt, Some(will));
    let (events_tx, events_rx) = mpsc::channel(MESSAGING_EVENT_CAPACITY);
    let event_loop = spawn_event_loop(
        eventloop,
        events_tx,
        EventLoopTiming {
            reconnect_delay: config.mqtt.reconnect_delay(),
            connect_timeout: config.mqtt.connect_timeout(),
        },
    );

    let coordinator = BridgeCoordinator::new(&config, mqtt_client.clone(), events_rx);
    let shutdown = runner.shutdown_signal();

    let result = runner.run(coordinator.run(shutdown)).await;

    // Let the event loop flush the offline status before disconnecting.
    if let Err(e) = mqtt_client.try_disconnect() {
        tracing::debug!(error = %e, "MQTT disconnect request failed");
    }
    if tokio::time::timeout(DISCONNECT_GRACE, event_loop).await.is_err() {
        tracing::debug!("MQTT event loop did not stop in time");
    }

    result.context("Bridge stopped with an error")
}
