//! Broker client abstraction and publish bookkeeping.

use rumqttc::{AsyncClient, QoS};

use crate::error::{BridgeError, Result};

/// The subset of an MQTT client a bridge needs.
///
/// Both operations are non-blocking: they hand the request to the client's
/// outgoing queue and return immediately. Everything is sent with QoS 1.
pub trait BrokerClient {
    /// Queue a publish of `payload` to `topic`.
    fn try_publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    /// Queue a subscription to `topic`.
    fn try_subscribe(&self, topic: &str) -> Result<()>;
}

impl BrokerClient for AsyncClient {
    fn try_publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        AsyncClient::try_publish(self, topic, QoS::AtLeastOnce, retain, payload)
            .map_err(BridgeError::from)
    }

    fn try_subscribe(&self, topic: &str) -> Result<()> {
        AsyncClient::try_subscribe(self, topic, QoS::AtLeastOnce).map_err(BridgeError::from)
    }
}

/// What happened to a publish request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the broker client.
    Published,
    /// Dropped because the broker link was not connected.
    Skipped,
}

/// Running publish statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully queued publishes.
    pub success: u64,
    /// Number of publishes rejected by the client.
    pub failed: u64,
    /// Number of publishes dropped while disconnected.
    pub skipped: u64,
}

impl PublishStats {
    /// Record the result of one publish attempt.
    pub fn record<E>(&mut self, result: &std::result::Result<PublishOutcome, E>) {
        match result {
            Ok(PublishOutcome::Published) => self.success += 1,
            Ok(PublishOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    /// Total number of attempted publishes.
    pub fn total(&self) -> u64 {
        self.success + self.failed + self.skipped
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}
