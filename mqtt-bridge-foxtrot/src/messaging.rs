//! MQTT broker link.
//!
//! The rumqttc event loop runs in its own task and reports connection
//! changes and inbound command messages to the coordinator as
//! [`MessagingEvent`]s. [`MessagingLink`] mirrors the connection state on the
//! coordinator side and gates every publish on it.

use std::time::Duration;

use foxbridge_framework::{BridgeError, BrokerClient, PublishOutcome, PublishStats};
use rumqttc::{AsyncClient, Event, EventLoop, Packet};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::runtime::LinkState;

/// Event reported by the MQTT event loop task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagingEvent {
    /// A connection attempt is starting.
    Connecting,
    /// The broker acknowledged the connection.
    Connected,
    /// The connection failed or dropped.
    Disconnected(String),
    /// A message arrived on a subscribed topic.
    Command { topic: String, payload: Vec<u8> },
}

/// Failure to hand a message to the broker client.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode payload for {topic}: {source}")]
    Encode {
        topic: String,
        source: serde_json::Error,
    },
    #[error("broker client rejected {topic}: {source}")]
    Rejected { topic: String, source: BridgeError },
}

/// Coordinator-side view of the broker connection.
pub struct MessagingLink<C: BrokerClient = AsyncClient> {
    client: C,
    state: LinkState,
    stats: PublishStats,
}

impl<C: BrokerClient> MessagingLink<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: LinkState::Disconnected,
            stats: PublishStats::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Apply a connection event to the link state.
    ///
    /// Command messages leave the state untouched.
    pub fn on_event(&mut self, event: &MessagingEvent) {
        match event {
            MessagingEvent::Connecting => {
                if self.state != LinkState::Connecting {
                    tracing::debug!("Connecting to MQTT broker");
                }
                self.state = LinkState::Connecting;
            }
            MessagingEvent::Connected => {
                tracing::info!("Connected to MQTT broker");
                self.state = LinkState::Connected;
            }
            MessagingEvent::Disconnected(reason) => {
                if self.state.is_connected() {
                    tracing::warn!(reason = %reason, "Disconnected from MQTT broker");
                } else {
                    tracing::error!(reason = %reason, "MQTT connection attempt failed");
                }
                self.state = LinkState::Disconnected;
            }
            MessagingEvent::Command { .. } => {}
        }
    }

    /// Publish a retained QoS 1 message.
    ///
    /// While the broker is not connected the message is dropped and
    /// [`PublishOutcome::Skipped`] is returned. Nothing is queued or retried.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<PublishOutcome, PublishError> {
        let result = self.try_publish(topic, payload.into());
        self.stats.record(&result);

        match &result {
            Ok(PublishOutcome::Published) => tracing::trace!(topic = %topic, "Published"),
            Ok(PublishOutcome::Skipped) => {
                tracing::debug!(topic = %topic, "MQTT not connected, skipping publish")
            }
            Err(e) => tracing::error!(error = %e, "Publish failed"),
        }

        result
    }

    /// Publish `value` serialized as JSON.
    pub fn publish_json<T: Serialize>(
        &mut self,
        topic: &str,
        value: &T,
    ) -> Result<PublishOutcome, PublishError> {
        match serde_json::to_vec(value) {
            Ok(payload) => self.publish(topic, payload),
            Err(source) => {
                let result = Err(PublishError::Encode {
                    topic: topic.to_string(),
                    source,
                });
                self.stats.record(&result);
                result
            }
        }
    }

    /// Subscribe to a topic. Skipped while disconnected.
    pub fn subscribe(&mut self, topic: &str) -> Result<PublishOutcome, PublishError> {
        if !self.is_connected() {
            return Ok(PublishOutcome::Skipped);
        }
        self.client
            .try_subscribe(topic)
            .map(|()| PublishOutcome::Published)
            .map_err(|source| PublishError::Rejected {
                topic: topic.to_string(),
                source,
            })
    }

    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<PublishOutcome, PublishError> {
        if !self.is_connected() {
            return Ok(PublishOutcome::Skipped);
        }
        self.client
            .try_publish(topic, payload, true)
            .map(|()| PublishOutcome::Published)
            .map_err(|source| PublishError::Rejected {
                topic: topic.to_string(),
                source,
            })
    }
}

/// Render a state payload with three decimals.
///
/// Exact ties round away from zero and negative zero prints as `0.000`, the
/// way JavaScript's `toFixed(3)` does. A double sits exactly halfway between
/// two thousandths only when it is an odd multiple of 1/16.
pub fn format_value(value: f64) -> String {
    if value == 0.0 {
        return "0.000".to_string();
    }

    let sixteenths = value.abs() * 16.0;
    if sixteenths.fract() == 0.0 && sixteenths < 1e15 {
        let sixteenths = sixteenths as u64;
        if sixteenths % 2 == 1 {
            let thousandths = (sixteenths * 125 + 1) / 2;
            let sign = if value < 0.0 { "-" } else { "" };
            return format!("{sign}{}.{:03}", thousandths / 1000, thousandths % 1000);
        }
    }

    format!("{value:.3}")
}

/// Timing of the MQTT event loop task.
#[derive(Debug, Clone, Copy)]
pub struct EventLoopTiming {
    /// Pause between a connection failure and the next attempt.
    pub reconnect_delay: Duration,
    /// Bound on the handshake of each attempt.
    pub connect_timeout: Duration,
}

/// Drive the rumqttc event loop, forwarding events to the coordinator.
///
/// rumqttc reconnects on the next poll after an error; the task sleeps
/// `reconnect_delay` in between, giving a fixed reconnect cadence. The task
/// ends when the receiving side of `events` is dropped.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::Sender<MessagingEvent>,
    timing: EventLoopTiming,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut connected = false;

        if events.send(MessagingEvent::Connecting).await.is_err() {
            return;
        }

        loop {
            let polled = if connected {
                eventloop.poll().await.map_err(|e| e.to_string())
            } else {
                match tokio::time::timeout(timing.connect_timeout, eventloop.poll()).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!(
                        "connection timed out after {:?}",
                        timing.connect_timeout
                    )),
                }
            };

            let event = match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected = true;
                    MessagingEvent::Connected
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => MessagingEvent::Command {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                },
                Ok(_) => continue,
                Err(reason) => {
                    connected = false;
                    if events
                        .send(MessagingEvent::Disconnected(reason))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    tokio::time::sleep(timing.reconnect_delay).await;
                    MessagingEvent::Connecting
                }
            };

            if events.send(event).await.is_err() {
                break;
            }
        }

        tracing::debug!("MQTT event loop stopped");
    })
}
